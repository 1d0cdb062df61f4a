use super::automaton;
use super::time_stamped::{SeqMethod, TimeStamped};
use parking_lot::Mutex;
use rayon::ThreadPoolBuilder;
use std::fmt::Debug;
use std::hash::Hash;
use std::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinearizabilityResult {
    Success,
    Failure(String),
}

/// Runs a worker on several threads against one concurrent object, records
/// the resulting history and checks it against a sequential specification.
pub struct LinearizabilityTester<C, Seq, Ret> {
    num_threads: usize,
    concurrent: C,
    sequential: Seq,
    history: Vec<TimeStamped<Seq, Ret>>,
}

/// The per-thread recorder handed to the worker.
pub struct ThreadLog<'a, C, Seq, Ret> {
    id: usize,
    concurrent: &'a C,
    events: Vec<TimeStamped<Seq, Ret>>,
}

impl<C, Seq, Ret> LinearizabilityTester<C, Seq, Ret>
where
    C: Sync,
    Seq: Clone + Hash + Eq,
    Ret: Clone + PartialEq + Debug + Send,
{
    pub fn new(num_threads: usize, concurrent: C, sequential: Seq) -> Self {
        LinearizabilityTester {
            num_threads,
            concurrent,
            sequential,
            history: Vec::new(),
        }
    }

    pub fn run<F>(&mut self, worker: F) -> LinearizabilityResult
    where
        F: Fn(usize, &mut ThreadLog<C, Seq, Ret>) + Sync,
    {
        let pool = match ThreadPoolBuilder::new().num_threads(self.num_threads).build() {
            Ok(pool) => pool,
            Err(err) => return LinearizabilityResult::Failure(format!("could not start workers: {}", err)),
        };

        let collected: Mutex<Vec<TimeStamped<Seq, Ret>>> = Mutex::new(Vec::new());
        let num_threads = self.num_threads;
        let concurrent = &self.concurrent;
        let (worker, collected_ref) = (&worker, &collected);
        pool.scope(|scope| {
            for id in 0..num_threads {
                scope.spawn(move |_| {
                    let mut log = ThreadLog::new(id, concurrent);
                    worker(id, &mut log);
                    collected_ref.lock().extend(log.events);
                });
            }
        });

        self.history = collected.into_inner();
        self.history.sort_by_key(|event| event.invoked);
        match automaton::find_linearization(&self.sequential, &self.history) {
            Ok(_) => LinearizabilityResult::Success,
            Err(message) => LinearizabilityResult::Failure(message),
        }
    }

    /// The history recorded by the last run, ordered by invocation.
    pub fn history(&self) -> &[TimeStamped<Seq, Ret>] {
        &self.history
    }
}

impl<'a, C, Seq, Ret> ThreadLog<'a, C, Seq, Ret> {
    fn new(id: usize, concurrent: &'a C) -> Self {
        ThreadLog {
            id,
            concurrent,
            events: Vec::new(),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Record a call of `method`, whose result is checked against `seq_method`.
    pub fn log(&mut self, method: fn(&C) -> Option<Ret>, message: String, seq_method: SeqMethod<Seq, Ret>) {
        let invoked = Instant::now();
        let result = method(self.concurrent);
        let returned = Instant::now();
        self.events.push(TimeStamped {
            thread: self.id,
            message,
            invoked,
            returned,
            arg: None,
            result,
            op: seq_method,
        });
    }

    /// Record a call of `method` with argument `val`, which returns nothing.
    pub fn log_val(&mut self, method: fn(&C, Ret), val: Ret, message: String, seq_method: SeqMethod<Seq, Ret>)
    where
        Ret: Clone,
    {
        let invoked = Instant::now();
        method(self.concurrent, val.clone());
        let returned = Instant::now();
        self.events.push(TimeStamped {
            thread: self.id,
            message,
            invoked,
            returned,
            arg: Some(val),
            result: None,
            op: seq_method,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::super::time_stamped::TimeStamped;
    use super::{LinearizabilityResult, LinearizabilityTester};
    use crate::testing::automaton;
    use im::Vector;
    use parking_lot::Mutex;
    use std::time::{Duration, Instant};

    fn sequential_pop(queue: &Vector<u8>, _: Option<u8>) -> (Vector<u8>, Option<u8>) {
        let mut next = queue.clone();
        let result = next.pop_front();
        (next, result)
    }

    fn sequential_push(queue: &Vector<u8>, val: Option<u8>) -> (Vector<u8>, Option<u8>) {
        let mut next = queue.clone();
        next.extend(val);
        (next, None)
    }

    fn event(base: Instant, thread: usize, start: u64, end: u64, push: Option<u8>, popped: Option<u8>) -> TimeStamped<Vector<u8>, u8> {
        let (op, message): (fn(&Vector<u8>, Option<u8>) -> (Vector<u8>, Option<u8>), &str) = match push {
            Some(_) => (sequential_push, "push"),
            None => (sequential_pop, "pop"),
        };
        TimeStamped {
            thread,
            message: message.to_owned(),
            invoked: base + Duration::from_millis(start),
            returned: base + Duration::from_millis(end),
            arg: push,
            result: popped,
            op,
        }
    }

    #[test]
    fn test_overlapping_history_is_accepted() {
        // pop(2) overlaps push(2), which may linearize first
        let base = Instant::now();
        let history = vec![
            event(base, 0, 0, 10, Some(1), None),
            event(base, 0, 20, 40, Some(2), None),
            event(base, 1, 15, 25, None, Some(1)),
            event(base, 1, 30, 35, None, Some(2)),
        ];
        assert!(automaton::find_linearization(&Vector::new(), &history).is_ok());
    }

    #[test]
    fn test_reordered_history_is_rejected() {
        // push(1) returned before push(2) started, so 2 cannot come out first
        let base = Instant::now();
        let history = vec![
            event(base, 0, 0, 10, Some(1), None),
            event(base, 0, 20, 30, Some(2), None),
            event(base, 1, 40, 50, None, Some(2)),
        ];
        assert!(automaton::find_linearization(&Vector::new(), &history).is_err());
    }

    struct LockedQueue(Mutex<Vec<u8>>);

    impl LockedQueue {
        fn push(&self, val: u8) {
            self.0.lock().push(val);
        }

        // Pops from the wrong end
        fn pop(&self) -> Option<u8> {
            self.0.lock().pop()
        }
    }

    #[test]
    fn test_detects_lifo_queue() {
        let mut tester: LinearizabilityTester<LockedQueue, Vector<u8>, u8> =
            LinearizabilityTester::new(1, LockedQueue(Mutex::new(Vec::new())), Vector::new());
        let result = tester.run(|_, log| {
            log.log_val(LockedQueue::push, 1, "push: 1".to_owned(), sequential_push);
            log.log_val(LockedQueue::push, 2, "push: 2".to_owned(), sequential_push);
            log.log(LockedQueue::pop, "pop".to_owned(), sequential_pop);
        });
        assert!(matches!(result, LinearizabilityResult::Failure(_)));
        assert_eq!(tester.history().len(), 3);
    }
}
