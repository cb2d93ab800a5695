//! Shared harness: a mock server on an ephemeral port and a listener that
//! records every callback.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use urlnet_core::{NetworkListener, ResponseBody, ResponseHeaders};

/// Start the mock server on a random port and return its base URL.
pub fn spawn_server() -> String {
    let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = std_listener.local_addr().unwrap();
    std_listener.set_nonblocking(true).unwrap();

    std::thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let listener = tokio::net::TcpListener::from_std(std_listener).unwrap();
            mock_server::run(listener).await
        })
        .unwrap();
    });

    format!("http://{addr}")
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Started,
    Running { receiving: bool, current: i64, total: i64 },
    Failed { message: String, disconnect: bool },
    Finished { headers: Option<ResponseHeaders>, result: Option<ResponseBody> },
}

#[derive(Debug, Default)]
pub struct Recorder {
    events: Mutex<Vec<Event>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn running(&self) -> Vec<(bool, i64, i64)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Running { receiving, current, total } => Some((receiving, current, total)),
                _ => None,
            })
            .collect()
    }

    pub fn failures(&self) -> Vec<(String, bool)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Failed { message, disconnect } => Some((message, disconnect)),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.events().iter().filter(|e| pred(e)).count()
    }

    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

impl NetworkListener for Recorder {
    fn on_started(&self) {
        self.push(Event::Started);
    }

    fn on_running(&self, receiving: bool, current: i64, total: i64) {
        self.push(Event::Running { receiving, current, total });
    }

    fn on_failed(&self, message: &str, attempted_disconnect: bool) {
        self.push(Event::Failed {
            message: message.to_string(),
            disconnect: attempted_disconnect,
        });
    }

    fn on_finished(&self, headers: Option<&ResponseHeaders>, result: Option<&ResponseBody>) {
        self.push(Event::Finished {
            headers: headers.cloned(),
            result: result.cloned(),
        });
    }
}
