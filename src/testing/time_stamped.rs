use std::fmt;
use std::time::Instant;

/// A method of the sequential specification: takes the state and the
/// operation's argument, returns the next state and the expected result.
pub type SeqMethod<Seq, Ret> = fn(&Seq, Option<Ret>) -> (Seq, Option<Ret>);

/// One completed operation of a concurrent history.
pub struct TimeStamped<Seq, Ret> {
    pub thread: usize,
    pub message: String,
    pub invoked: Instant,
    pub returned: Instant,
    pub arg: Option<Ret>,
    pub result: Option<Ret>,
    pub op: SeqMethod<Seq, Ret>,
}

impl<Seq, Ret: fmt::Debug> fmt::Debug for TimeStamped<Seq, Ret> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[thread {}] {} -> {:?}", self.thread, self.message, self.result)
    }
}
