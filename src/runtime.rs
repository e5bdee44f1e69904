//! Local executor glue.
//!
//! Everything in the engine is `!Send` and runs in one cooperative
//! scheduling domain.  [`run_until`] spawns the device's background work on
//! an `edge-executor` local executor and blocks the current thread on
//! `body`; when `body` finishes the background task is dropped.

use core::future::Future;

use edge_executor::LocalExecutor;
use log::debug;

use crate::device::Device;
use crate::transport::Link;

/// Tasks the local executor can hold.
const TASKS: usize = 8;

/// Drive `device` in the background while `body` runs to completion on the
/// current thread.
pub fn run_until<L, F>(device: &Device<L>, body: F) -> F::Output
where
    L: Link + 'static,
    F: Future,
{
    let executor: LocalExecutor<'_, TASKS> = LocalExecutor::new();
    let background = device.clone();
    let task = executor.spawn(async move { background.run().await });
    debug!("runtime: device task spawned");

    let output = futures_lite::future::block_on(executor.run(body));
    drop(task);
    output
}
