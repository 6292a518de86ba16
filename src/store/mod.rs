//! Durable storage for reports and transcripts.

pub mod convex;
#[cfg(feature = "sqlite-persistence")]
pub mod sqlite;


use async_trait::async_trait;

use crate::error::StoreError;
use crate::report::{Report, ReportDraft};
use crate::transcript::{NewTranscriptEntry, RecentConversation, TranscriptEntry};

/// Operations the facade needs from a document store.
///
/// Implementations own timestamping: `store_report` stamps `generatedAt` and
/// `append_transcript` stamps `ts` with the store's clock.
#[async_trait]
pub trait ParrotStore: Send + Sync {
    /// Short backend label used in logs and health output.
    fn kind(&self) -> &'static str;

    async fn store_report(&self, draft: &ReportDraft) -> Result<(), StoreError>;

    /// Most recent report by `generatedAt`; the later insert wins a tie.
    async fn latest_report(&self, project_id: &str) -> Result<Option<Report>, StoreError>;

    async fn append_transcript(&self, entry: &NewTranscriptEntry) -> Result<(), StoreError>;

    /// Entries for a conversation, oldest first.
    async fn list_transcript(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<TranscriptEntry>, StoreError>;

    /// See [`crate::transcript::recent_conversations`] for the windowing rules.
    async fn recent_conversations(
        &self,
        project_id: &str,
        limit: usize,
    ) -> Result<Vec<RecentConversation>, StoreError>;
}
