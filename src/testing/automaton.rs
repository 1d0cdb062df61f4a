use super::time_stamped::TimeStamped;
use std::collections::HashSet;
use std::fmt::Debug;
use std::hash::Hash;

/// A point of the search: the sequential state reached and the operations
/// linearized so far.
#[derive(Clone, PartialEq, Eq, Hash)]
struct Configuration<Seq> {
    sequential: Seq,
    linearized: Linearized,
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct Linearized {
    words: Vec<u64>,
}

impl Linearized {
    fn new(len: usize) -> Self {
        Linearized {
            words: vec![0; (len + 63) / 64],
        }
    }

    fn contains(&self, index: usize) -> bool {
        self.words[index / 64] & (1 << (index % 64)) != 0
    }

    fn insert(&mut self, index: usize) {
        self.words[index / 64] |= 1 << (index % 64);
    }

    fn remove(&mut self, index: usize) {
        self.words[index / 64] &= !(1 << (index % 64));
    }
}

/// Search for a sequential order of `history` that respects real-time
/// precedence and matches every recorded result (Wing & Gong, with the
/// memoisation suggested by Lowe).
pub(crate) fn find_linearization<Seq, Ret>(initial: &Seq, history: &[TimeStamped<Seq, Ret>]) -> Result<Vec<usize>, String>
where
    Seq: Clone + Hash + Eq,
    Ret: Clone + PartialEq + Debug,
{
    let mut search = Search {
        history,
        linearized: Linearized::new(history.len()),
        order: Vec::with_capacity(history.len()),
        seen: HashSet::new(),
    };
    if search.extend(initial) {
        Ok(search.order)
    } else {
        Err(format!("no linearization of {} operations: {:?}", history.len(), history))
    }
}

struct Search<'h, Seq, Ret> {
    history: &'h [TimeStamped<Seq, Ret>],
    linearized: Linearized,
    order: Vec<usize>,
    seen: HashSet<Configuration<Seq>>,
}

impl<'h, Seq, Ret> Search<'h, Seq, Ret>
where
    Seq: Clone + Hash + Eq,
    Ret: Clone + PartialEq + Debug,
{
    fn extend(&mut self, state: &Seq) -> bool {
        if self.order.len() == self.history.len() {
            return true;
        }
        let configuration = Configuration {
            sequential: state.clone(),
            linearized: self.linearized.clone(),
        };
        if !self.seen.insert(configuration) {
            return false;
        }

        // Nothing invoked after the earliest pending return can go next
        let horizon = match self.pending().map(|(_, op)| op.returned).min() {
            Some(horizon) => horizon,
            None => return true,
        };
        let candidates: Vec<usize> = self
            .pending()
            .filter(|(_, op)| op.invoked <= horizon)
            .map(|(index, _)| index)
            .collect();

        for index in candidates {
            let op = &self.history[index];
            let (next, result) = (op.op)(state, op.arg.clone());
            if result != op.result {
                continue;
            }
            self.linearized.insert(index);
            self.order.push(index);
            if self.extend(&next) {
                return true;
            }
            self.order.pop();
            self.linearized.remove(index);
        }
        false
    }

    fn pending(&self) -> impl Iterator<Item = (usize, &'h TimeStamped<Seq, Ret>)> + '_ {
        self.history
            .iter()
            .enumerate()
            .filter(move |(index, _)| !self.linearized.contains(*index))
    }
}
