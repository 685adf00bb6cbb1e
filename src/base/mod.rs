//! Base types and error handling.
//!
//! Provides foundational types mirroring Chromium's `net/base/`:
//! - [`NetError`](neterror::NetError): error kinds with `net_error_list.h` codes
//! - [`LoadState`](loadstate::LoadState): connect attempt states
//! - [`CancelToken`](cancel::CancelToken): explicit attempt cancellation
//! - [`TimerThread`](timer::TimerThread): one-shot timers on a dedicated thread

pub mod cancel;
pub mod context;
pub mod loadstate;
pub mod neterror;
pub mod timer;

#[cfg(test)]
mod tests;
