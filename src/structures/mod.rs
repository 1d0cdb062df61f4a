pub use self::queue::ConcurrentQueue;

mod queue;
