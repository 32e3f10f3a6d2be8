// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use serde::{Deserialize, Serialize};

const DEFAULT_QUEUE_CAPACITY: usize = 32;
const DEFAULT_MAX_INFLIGHT: usize = 128;

/// Session-scoped settings, fixed at CONNECT time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    keep_alive: u64,
    clean_session: bool,
    max_inflight_messages: usize,
    delivered_queue_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            keep_alive: 60,
            clean_session: true,
            max_inflight_messages: DEFAULT_MAX_INFLIGHT,
            delivered_queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl SessionConfig {
    #[must_use]
    pub fn new(keep_alive: u64, clean_session: bool) -> Self {
        Self {
            keep_alive,
            clean_session,
            ..Self::default()
        }
    }

    pub fn set_keep_alive(&mut self, keep_alive: u64) -> &mut Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Keep alive interval in seconds. Zero turns the timers off.
    #[must_use]
    #[inline]
    pub const fn keep_alive(&self) -> u64 {
        self.keep_alive
    }

    pub fn set_clean_session(&mut self, clean_session: bool) -> &mut Self {
        self.clean_session = clean_session;
        self
    }

    /// If true, session state is discarded when the connection ends.
    #[must_use]
    #[inline]
    pub const fn clean_session(&self) -> bool {
        self.clean_session
    }

    pub fn set_max_inflight_messages(&mut self, max_inflight_messages: usize) -> &mut Self {
        self.max_inflight_messages = max_inflight_messages;
        self
    }

    #[must_use]
    #[inline]
    pub const fn max_inflight_messages(&self) -> usize {
        self.max_inflight_messages
    }

    pub fn set_delivered_queue_capacity(&mut self, capacity: usize) -> &mut Self {
        self.delivered_queue_capacity = capacity;
        self
    }

    /// Bound of the delivered message queue. A full queue back-pressures
    /// inbound message flows until the application consumes.
    #[must_use]
    #[inline]
    pub const fn delivered_queue_capacity(&self) -> usize {
        self.delivered_queue_capacity
    }
}
