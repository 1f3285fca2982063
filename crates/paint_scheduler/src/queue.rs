/// Index of the next item to run. Scans from the tail so that, among equal
/// priorities, the most recently queued item wins. Any negative priority runs
/// immediately.
pub fn pick_next<T>(items: &[T], priority: impl Fn(&T) -> i32) -> Option<usize> {
    let mut best: Option<(usize, i32)> = None;
    for index in (0..items.len()).rev() {
        let candidate = priority(&items[index]);
        if candidate < 0 {
            return Some(index);
        }
        match best {
            Some((_, current)) if candidate >= current => {}
            _ => best = Some((index, candidate)),
        }
    }
    best.map(|(index, _)| index)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pick(priorities: &[i32]) -> Option<usize> {
        pick_next(priorities, |priority| *priority)
    }

    #[test]
    fn lowest_priority_value_wins() {
        assert_eq!(pick(&[30, 10, 20]), Some(1));
    }

    #[test]
    fn ties_go_to_the_tail() {
        assert_eq!(pick(&[5, 5, 5]), Some(2));
        assert_eq!(pick(&[1, 7, 1, 7]), Some(2));
    }

    #[test]
    fn negative_priority_short_circuits_from_the_tail() {
        assert_eq!(pick(&[-5, 0, -1, 3]), Some(2));
        assert_eq!(pick(&[0, -1]), Some(1));
    }

    #[test]
    fn empty_queue_has_nothing_to_pick() {
        assert_eq!(pick(&[]), None);
    }
}
