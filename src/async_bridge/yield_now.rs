use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Future that returns `Pending` once, waking itself, then completes.
#[derive(Debug, Default)]
#[must_use = "futures do nothing unless awaited"]
pub struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            return Poll::Ready(());
        }
        self.yielded = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}

/// Gives other tasks on the same executor a chance to run.
pub fn yield_point() -> YieldNow {
    YieldNow::default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::task::noop_waker_ref;

    #[test]
    fn test_yields_exactly_once() {
        let mut fut = yield_point();
        let mut cx = Context::from_waker(noop_waker_ref());
        assert!(Pin::new(&mut fut).poll(&mut cx).is_pending());
        assert!(Pin::new(&mut fut).poll(&mut cx).is_ready());
    }

    #[test]
    fn test_interleaves_joined_futures() {
        use parking_lot::Mutex;
        let log = Mutex::new(Vec::new());
        let step = |name: &'static str| {
            let log = &log;
            async move {
                log.lock().push((name, 1));
                yield_point().await;
                log.lock().push((name, 2));
            }
        };

        futures::executor::block_on(futures::future::join(step("a"), step("b")));
        let log = log.into_inner();
        assert_eq!(log, vec![("a", 1), ("b", 1), ("a", 2), ("b", 2)]);
    }
}
