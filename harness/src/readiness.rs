//! Polling an agent's card until it answers.

use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::{debug, info, instrument};

use crate::core::budget::{next_poll_delay, remaining_budget};
use crate::error::HarnessError;
use crate::io::transport::{AgentCard, AgentTransport};

/// Poll `url` for its agent card every `interval` until `timeout` elapses.
///
/// Connection errors and card-less answers count as "not ready yet". Each
/// card fetch is limited to the time left, so the wait never overruns.
#[instrument(skip(transport), fields(timeout_secs = timeout.as_secs()))]
pub fn wait_ready(
    transport: &dyn AgentTransport,
    url: &str,
    timeout: Duration,
    interval: Duration,
) -> Result<AgentCard> {
    let started = Instant::now();
    let deadline = started + timeout;
    let mut attempts = 0u32;
    let unready = || -> anyhow::Error {
        HarnessError::AgentUnready {
            url: url.to_string(),
            waited_secs: started.elapsed().as_secs(),
        }
        .into()
    };
    loop {
        let Some(budget) = remaining_budget(deadline, Instant::now()) else {
            return Err(unready());
        };
        attempts += 1;
        match transport.fetch_card(url, budget) {
            Ok(Some(card)) => {
                info!(attempts, agent = %card.name, "agent ready");
                return Ok(card);
            }
            Ok(None) => debug!(attempts, "agent answered without a card"),
            Err(err) => debug!(attempts, err = %err, "agent not reachable yet"),
        }
        let Some(delay) = next_poll_delay(deadline, Instant::now(), interval) else {
            return Err(unready());
        };
        thread::sleep(delay);
    }
}
