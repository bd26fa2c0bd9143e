use std::future::Future;
use std::time::Duration;

use tokio::runtime::{Builder, Handle, RuntimeFlavor};

/// Drives `future` to completion from synchronous adapter code.
///
/// Inside the Lambda runtime this parks the current worker with
/// `block_in_place`; outside any runtime a throwaway current-thread runtime is
/// used instead.
pub(crate) fn block_on<F: Future>(future: F) -> Result<F::Output, String> {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::CurrentThread => {
            Err("blocking adapter calls require a multi-thread tokio runtime".to_string())
        }
        Ok(handle) => Ok(tokio::task::block_in_place(|| handle.block_on(future))),
        Err(_) => {
            let runtime = Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|error| format!("failed to start blocking runtime: {error}"))?;
            Ok(runtime.block_on(future))
        }
    }
}

/// Like [`block_on`], but drops `future` once `timeout` has elapsed.
pub(crate) fn block_on_with_timeout<F: Future>(
    operation: &str,
    timeout: Duration,
    future: F,
) -> Result<F::Output, String> {
    match block_on(tokio::time::timeout(timeout, future))? {
        Ok(output) => Ok(output),
        Err(_) => Err(format!("{operation} timed out after {}ms", timeout.as_millis())),
    }
}
