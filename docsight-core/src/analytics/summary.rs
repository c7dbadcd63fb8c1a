//! Composite dashboard summary
//!
//! One [`Summary`] is stitched together from several pipes read
//! concurrently. A slow or failing pipe degrades only its own slice.

use std::future::Future;
use std::time::Duration;

use serde::Serialize;

use crate::error::Result;

use super::query::{
    AnalyticsReader, DailyVolume, DocumentCount, EventTotals, QuestionCount, TermCount, Window,
};

/// Rows kept per ranked list
const SUMMARY_LIST_LIMIT: u32 = 10;

/// Slice names, in the order they appear in [`Summary::degraded`]
pub const SUMMARY_SLICES: &[&str] = &[
    "event_totals",
    "daily_volume",
    "top_search_terms",
    "top_chat_questions",
    "zero_result_searches",
    "top_documents",
];

/// Dashboard summary for a window.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Summary {
    pub window_days: u32,

    // Totals
    pub totals: EventTotals,

    /// Per-day volume, oldest first
    pub daily: Vec<DailyVolume>,

    // Rankings
    pub top_search_terms: Vec<TermCount>,
    pub top_chat_questions: Vec<QuestionCount>,
    pub zero_result_searches: Vec<TermCount>,
    pub top_documents: Vec<DocumentCount>,

    /// Slices that fell back to their default
    pub degraded: Vec<&'static str>,
}

impl Summary {
    /// Summary with every slice at its default
    pub fn fallback(window: Window) -> Self {
        Self {
            window_days: window.days(),
            degraded: SUMMARY_SLICES.to_vec(),
            ..Default::default()
        }
    }

    /// True when no slice could be read
    pub fn is_empty_fallback(&self) -> bool {
        self.degraded.len() == SUMMARY_SLICES.len()
    }

    pub fn is_degraded(&self) -> bool {
        !self.degraded.is_empty()
    }

    /// Day with the most events, if any day had activity
    pub fn busiest_day(&self) -> Option<&DailyVolume> {
        self.daily
            .iter()
            .filter(|d| d.total() > 0)
            .max_by_key(|d| d.total())
    }

    /// Share of searches that returned nothing, as a percentage.
    pub fn zero_result_rate(&self) -> Option<f64> {
        if self.totals.searches == 0 {
            return None;
        }
        let zero: u64 = self.zero_result_searches.iter().map(|t| t.count).sum();
        Some(zero as f64 * 100.0 / self.totals.searches as f64)
    }

    /// Format average chat latency for display (e.g., "1.4s", "850ms").
    pub fn format_chat_latency(&self) -> String {
        match self.totals.avg_chat_latency_ms {
            Some(ms) if ms >= 1000.0 => format!("{:.1}s", ms / 1000.0),
            Some(ms) => format!("{:.0}ms", ms),
            None => "-".to_string(),
        }
    }
}

/// Await one slice under a timeout, substituting the default on failure.
async fn slice<T, F>(name: &'static str, timeout: Duration, fut: F) -> (T, Option<&'static str>)
where
    T: Default,
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(value)) => (value, None),
        Ok(Err(e)) => {
            tracing::warn!(slice = name, error = %e, "Summary slice failed, using default");
            (T::default(), Some(name))
        }
        Err(_) => {
            tracing::warn!(
                slice = name,
                timeout_ms = timeout.as_millis() as u64,
                "Summary slice timed out, using default"
            );
            (T::default(), Some(name))
        }
    }
}

impl AnalyticsReader {
    /// Read every summary slice concurrently.
    ///
    /// Never fails: a slice that errors or exceeds the slice timeout is
    /// replaced by its default and listed in [`Summary::degraded`].
    pub async fn get_summary(&self, window: Window) -> Summary {
        if !self.is_configured() {
            tracing::debug!("Analytics reads not configured, returning empty summary");
            return Summary::fallback(window);
        }

        let timeout = self.slice_timeout();
        let limit = SUMMARY_LIST_LIMIT;

        let (totals, daily, terms, questions, zero, documents) = tokio::join!(
            slice("event_totals", timeout, self.event_totals(window)),
            slice("daily_volume", timeout, self.daily_volume(window)),
            slice("top_search_terms", timeout, self.top_search_terms(limit, window)),
            slice("top_chat_questions", timeout, self.top_chat_questions(limit, window)),
            slice("zero_result_searches", timeout, self.zero_result_searches(limit, window)),
            slice("top_documents", timeout, self.top_documents(limit, window)),
        );

        let degraded = [totals.1, daily.1, terms.1, questions.1, zero.1, documents.1]
            .into_iter()
            .flatten()
            .collect();

        let mut daily = daily.0;
        daily.sort_by(|a, b| a.day.cmp(&b.day));

        Summary {
            window_days: window.days(),
            totals: totals.0,
            daily,
            top_search_terms: terms.0,
            top_chat_questions: questions.0,
            zero_result_searches: zero.0,
            top_documents: documents.0,
            degraded,
        }
    }
}
