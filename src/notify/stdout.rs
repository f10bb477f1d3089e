// src/notify/stdout.rs
use anyhow::Result;

use super::{Message, Notifier};

/// Console transport, mostly useful for dry runs and local debugging.
#[derive(Debug, Default)]
pub struct StdoutNotifier;

impl StdoutNotifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl Notifier for StdoutNotifier {
    async fn send(&self, msg: &Message) -> Result<()> {
        println!("{}\n{}", msg.title, msg.body);
        Ok(())
    }

    fn name(&self) -> &str {
        "stdout"
    }
}
