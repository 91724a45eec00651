// Copyright 2022 Webb Technologies Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Retry policies for async calls.

use std::time::Duration;

use backoff::backoff::Backoff;

/// A fixed-delay retry policy with a bounded attempt budget.
///
/// The submit checker polls the host for a commit result a few times and
/// then leaves the transaction for the next reconciliation sweep; this
/// policy expresses that budget for `backoff::future::retry`: every retry
/// waits the same `delay`, and once the budget is spent `next_backoff`
/// yields `None` so the operation's last error is returned to the caller.
#[derive(Debug, Clone)]
pub struct FixedDelayRetries {
    delay: Duration,
    max_attempts: usize,
    attempts_left: usize,
}

impl FixedDelayRetries {
    /// A policy that waits `delay` between attempts and allows at most
    /// `max_attempts` retries after the initial try.
    pub fn new(delay: Duration, max_attempts: usize) -> Self {
        Self {
            delay,
            max_attempts,
            attempts_left: max_attempts,
        }
    }
}

impl Backoff for FixedDelayRetries {
    fn next_backoff(&mut self) -> Option<Duration> {
        if self.attempts_left == 0 {
            return None;
        }
        self.attempts_left -= 1;
        Some(self.delay)
    }

    fn reset(&mut self) {
        self.attempts_left = self.max_attempts;
    }
}
