// Copyright 2024, The Android Open Source Project
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Answers blocked inbound transactions.
//!
//! The transport thread hands each blocked request over together with the
//! receiving end of its [`Transaction`](crate::Transaction) reply, and goes
//! back to its loop. The replier thread waits for the event loop's answers in
//! arrival order and passes each one to the completion function.

use super::protocol::Reply;
use log::{debug, error};
use std::io;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use tokio::sync::oneshot;

/// A request waiting for the event loop.
pub(crate) struct Pending<T> {
    pub request: T,
    pub reply: oneshot::Receiver<Reply>,
}

pub(crate) struct Replier<T> {
    tx: Option<mpsc::Sender<Pending<T>>>,
    thread: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> Replier<T> {
    /// Starts the replier thread. `complete` runs on that thread once per
    /// request; a request whose reply was dropped completes with
    /// [`Reply::Failed`].
    pub fn spawn<F>(complete: F) -> io::Result<Self>
    where
        F: Fn(T, Reply) + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<Pending<T>>();
        let thread = thread::Builder::new().name("gbinder-reply".to_string()).spawn(move || {
            for pending in rx {
                let reply = pending.reply.blocking_recv().unwrap_or_else(|_| {
                    debug!("Transaction dropped without a reply");
                    Reply::Failed
                });
                complete(pending.request, reply);
            }
        })?;
        Ok(Self { tx: Some(tx), thread: Some(thread) })
    }
}

impl<T> Replier<T> {
    /// Sender for blocked requests. Requests sent after [`Replier::stop`] come
    /// back as the error.
    pub fn sender(&self) -> Option<mpsc::Sender<Pending<T>>> {
        self.tx.clone()
    }

    /// Completes what is queued and joins the thread. Clones handed out by
    /// [`Replier::sender`] must be dropped first.
    pub fn stop(&mut self) {
        self.tx = None;
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Replier thread panicked");
            }
        }
    }
}

impl<T> Drop for Replier<T> {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn replier() -> (Replier<u32>, mpsc::Receiver<(u32, Reply)>) {
        let (done, completed) = mpsc::channel();
        let replier = Replier::spawn(move |request, reply| {
            let _ = done.send((request, reply));
        })
        .unwrap();
        (replier, completed)
    }

    #[test]
    fn submitting_does_not_wait_for_the_answer() {
        let (replier, completed) = replier();
        let sender = replier.sender().unwrap();

        let (answer, reply) = oneshot::channel();
        sender.send(Pending { request: 7, reply }).unwrap();
        assert!(completed.recv_timeout(Duration::from_millis(50)).is_err());

        answer.send(Reply::Int32(3)).unwrap();
        assert_eq!(completed.recv_timeout(Duration::from_secs(5)), Ok((7, Reply::Int32(3))));
    }

    #[test]
    fn requests_complete_in_arrival_order() {
        let (replier, completed) = replier();
        let sender = replier.sender().unwrap();

        let (first, reply) = oneshot::channel();
        sender.send(Pending { request: 1, reply }).unwrap();
        let (second, reply) = oneshot::channel();
        sender.send(Pending { request: 2, reply }).unwrap();

        first.send(Reply::None).unwrap();
        second.send(Reply::HidlString("a=1".into())).unwrap();
        assert_eq!(completed.recv_timeout(Duration::from_secs(5)), Ok((1, Reply::None)));
        assert_eq!(
            completed.recv_timeout(Duration::from_secs(5)),
            Ok((2, Reply::HidlString("a=1".into())))
        );
    }

    #[test]
    fn dropped_answer_completes_as_failed() {
        let (replier, completed) = replier();
        let sender = replier.sender().unwrap();

        let (answer, reply) = oneshot::channel::<Reply>();
        sender.send(Pending { request: 4, reply }).unwrap();
        drop(answer);
        assert_eq!(completed.recv_timeout(Duration::from_secs(5)), Ok((4, Reply::Failed)));
    }

    #[test]
    fn stop_drains_queued_requests() {
        let (mut replier, completed) = replier();
        let sender = replier.sender().unwrap();

        let (answer, reply) = oneshot::channel();
        sender.send(Pending { request: 9, reply }).unwrap();
        answer.send(Reply::Int32(0)).unwrap();
        drop(sender);

        replier.stop();
        assert_eq!(completed.try_recv(), Ok((9, Reply::Int32(0))));
        assert!(replier.sender().is_none());
    }
}
