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

//! An unbounded in-memory FIFO between a single producer and a single
//! consumer.
//!
//! The TX processor must be able to record a submitted transaction for the
//! checker without ever waiting on the checker's pace. The queue is realized
//! as two rendezvous endpoints driven by a pump task that owns a growable
//! buffer: the producer's send is accepted as soon as the pump reaches its
//! `select!`, regardless of how far behind the consumer is.
//!
//! Invariants: items come out in exactly the order they went in, and an
//! accepted item is never dropped while the process lives.

use std::collections::VecDeque;

use tokio::sync::mpsc;

/// Creates the unbounded FIFO and spawns its pump task.
///
/// The pump exits once both endpoints are gone: when every sender is dropped
/// it first drains the buffered items to the consumer.
pub fn unbounded<T: Send + 'static>() -> (mpsc::Sender<T>, mpsc::Receiver<T>) {
    let (enq_tx, mut enq_rx) = mpsc::channel::<T>(1);
    let (deq_tx, deq_rx) = mpsc::channel::<T>(1);
    tokio::spawn(async move {
        let mut buffer: VecDeque<T> = VecDeque::new();
        loop {
            if buffer.is_empty() {
                match enq_rx.recv().await {
                    Some(item) => buffer.push_back(item),
                    // producer gone and nothing buffered: we are done
                    None => return,
                }
            }
            tokio::select! {
                permit = deq_tx.reserve() => match permit {
                    Ok(permit) => {
                        if let Some(item) = buffer.pop_front() {
                            permit.send(item);
                        }
                    }
                    // consumer gone, remaining items are undeliverable
                    Err(_) => return,
                },
                incoming = enq_rx.recv() => match incoming {
                    Some(item) => buffer.push_back(item),
                    None => {
                        // producer closed: flush what is left, then stop
                        for item in buffer.drain(..) {
                            if deq_tx.send(item).await.is_err() {
                                return;
                            }
                        }
                        return;
                    }
                },
            }
        }
    });
    (enq_tx, deq_rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn strict_fifo_under_burst() {
        let (tx, mut rx) = unbounded::<u32>();
        // the consumer is paused while the producer floods the queue
        for i in 0..10_000u32 {
            tx.send(i).await.unwrap();
        }
        for i in 0..10_000u32 {
            assert_eq!(rx.recv().await, Some(i));
        }
    }

    #[tokio::test]
    async fn interleaved_producer_and_consumer() {
        let (tx, mut rx) = unbounded::<u32>();
        let producer = tokio::spawn(async move {
            for i in 0..1_000u32 {
                tx.send(i).await.unwrap();
                if i % 7 == 0 {
                    tokio::task::yield_now().await;
                }
            }
        });
        for i in 0..1_000u32 {
            assert_eq!(rx.recv().await, Some(i));
        }
        producer.await.unwrap();
    }

    #[tokio::test]
    async fn drains_buffered_items_after_producer_drops() {
        let (tx, mut rx) = unbounded::<u32>();
        for i in 0..100u32 {
            tx.send(i).await.unwrap();
        }
        drop(tx);
        for i in 0..100u32 {
            assert_eq!(rx.recv().await, Some(i));
        }
        assert_eq!(rx.recv().await, None);
    }
}
