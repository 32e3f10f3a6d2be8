// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Write-side keep-alive timer.
//!
//! The read side is bounded directly in the reader task; this module only
//! watches outbound silence. Every successful send pushes the deadline
//! forward, expiry runs the write-timeout hook once and the timer stays
//! dormant until the next send. A broker leaves the default hook in place
//! and relies on the client to ping; a client overrides it to send PINGREQ.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::hooks::{HookContext, Hooks};

pub(crate) struct KeepAlive {
    /// None if the keep-alive value is zero, which turns the timer off.
    period: Option<Duration>,

    deadline: Mutex<Instant>,

    rearm: Notify,
}

impl KeepAlive {
    pub fn new(keep_alive_secs: u64) -> Self {
        let period = (keep_alive_secs > 0).then(|| Duration::from_secs(keep_alive_secs));
        let deadline = Instant::now() + period.unwrap_or(Duration::ZERO);
        Self {
            period,
            deadline: Mutex::new(deadline),
            rearm: Notify::new(),
        }
    }

    #[must_use]
    pub const fn enabled(&self) -> bool {
        self.period.is_some()
    }

    /// Push the deadline one full period forward.
    ///
    /// Called after every successful packet write.
    pub fn rearm(&self) {
        if let Some(period) = self.period {
            let mut deadline = self.deadline.lock().unwrap_or_else(PoisonError::into_inner);
            *deadline = Instant::now() + period;
            self.rearm.notify_waiters();
        }
    }

    fn current_deadline(&self) -> Instant {
        *self.deadline.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Timer task. Runs until the handler aborts it on stop.
    pub async fn run(self: Arc<Self>, hooks: Arc<dyn Hooks>, ctx: HookContext) {
        if self.period.is_none() {
            return;
        }

        loop {
            let deadline = self.current_deadline();
            tokio::select! {
                () = tokio::time::sleep_until(deadline) => {
                    // A send may have moved the deadline while we slept.
                    if Instant::now() >= self.current_deadline() {
                        log::debug!("{}: Write side keep alive expired", ctx.client_id());
                        hooks.handle_write_timeout(&ctx);
                        // Single shot. Wait for the next send to watch again.
                        self.rearm.notified().await;
                    }
                }
                () = self.rearm.notified() => {}
            }
        }
    }
}
