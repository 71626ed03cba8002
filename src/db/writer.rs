//! Proposal writer: funnels reader proposals into the database from one task.

use std::sync::Arc;

use tokio::sync::mpsc;

use super::Database;
use crate::reader::ProgressSink;
use crate::types::Proposal;

/// [`ProgressSink`] backed by a single database writer task
///
/// `propose` never blocks the reader; proposals are applied in submission order.
/// Dropping every clone of the writer ends the task once the queue drains.
#[derive(Clone, Debug)]
pub struct ProposalWriter {
    tx: mpsc::UnboundedSender<Proposal>,
}

impl ProposalWriter {
    /// Spawn the writer task for one series
    pub fn spawn(
        db: Arc<Database>,
        series_id: impl Into<String>,
    ) -> (Self, tokio::task::JoinHandle<()>) {
        let series_id = series_id.into();
        let (tx, mut rx) = mpsc::unbounded_channel::<Proposal>();

        let handle = tokio::spawn(async move {
            while let Some(proposal) = rx.recv().await {
                if let Err(e) = db.apply_proposal(&series_id, &proposal).await {
                    tracing::error!(
                        series_id = %series_id,
                        proposal = ?proposal,
                        error = %e,
                        "Failed to apply reader proposal"
                    );
                }
            }
            tracing::debug!(series_id = %series_id, "Proposal writer stopped");
        });

        (Self { tx }, handle)
    }
}

impl ProgressSink for ProposalWriter {
    fn propose(&self, proposal: Proposal) {
        if self.tx.send(proposal).is_err() {
            tracing::warn!("Proposal writer has stopped; proposal dropped");
        }
    }
}
