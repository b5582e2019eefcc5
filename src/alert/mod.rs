//! Debounced AQI category alerts.
//!
//! The only state carried between requests is the last announced category,
//! which lives in the external [`AlertLedger`]. A new category is announced
//! once every category recorded in the trailing window agrees on it.
//!
//! Read-then-write against the ledger is not serialized: two requests crossing
//! a category boundary at the same moment may both announce it. That duplicate
//! is accepted.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::aqi::AqiCategory;
use crate::error::AlertError;

mod threema;

pub use threema::ThreemaGateway;

// ---

/// External record of categories and announcements.
#[async_trait]
pub trait AlertLedger: Send + Sync {
    /// Categories recorded within the trailing `window`, including the
    /// measurement just written.
    async fn recent_categories(&self, window: Duration) -> Result<Vec<AqiCategory>, AlertError>;

    /// Most recently announced category, `None` if nothing was ever announced.
    async fn last_announced(&self) -> Result<Option<AqiCategory>, AlertError>;

    async fn record_announcement(&self, category: AqiCategory) -> Result<(), AlertError>;
}

/// Messaging gateway that pushes a text to fixed recipients.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, recipients: &[String], text: &str) -> Result<(), AlertError>;
}

/// Text sent when the air settles into `category`.
pub fn alert_message(category: AqiCategory) -> &'static str {
    match category {
        AqiCategory::Good => "\u{1F7E2} The air quality is good, go outside!",
        AqiCategory::Moderate => "\u{1F7E1} The air quality is moderate.",
        AqiCategory::UnhealthyForSensitiveGroups => {
            "\u{1F7E0} The air quality is unhealthy for sensitive groups."
        }
        AqiCategory::Unhealthy => "\u{1F534} The air quality is unhealthy.",
        AqiCategory::VeryUnhealthy => "\u{1F7E3} The air quality is very unhealthy.",
        AqiCategory::Hazardous => "\u{1F7E4} The air quality is hazardous.",
    }
}

/// Category to announce, if any.
///
/// An empty window means the just-written sample is not visible yet; the
/// current sample alone then forms the window. A missing announcement counts
/// as `Good`.
pub fn decide(
    window: &[AqiCategory],
    current: AqiCategory,
    last_announced: Option<AqiCategory>,
) -> Option<AqiCategory> {
    // ---
    let settled = match window.split_first() {
        None => current,
        Some((first, rest)) => {
            if rest.iter().any(|c| c != first) {
                return None;
            }
            *first
        }
    };

    (settled != last_announced.unwrap_or(AqiCategory::Good)).then_some(settled)
}

// ---

pub struct AlertEngine {
    ledger: Arc<dyn AlertLedger>,
    notifier: Arc<dyn Notifier>,
    recipients: Vec<String>,
    window: Duration,
}

impl AlertEngine {
    // ---
    pub fn new(
        ledger: Arc<dyn AlertLedger>,
        notifier: Arc<dyn Notifier>,
        recipients: Vec<String>,
        window: Duration,
    ) -> Self {
        Self {
            ledger,
            notifier,
            recipients,
            window,
        }
    }

    /// Run one evaluation for a freshly recorded `current` category.
    ///
    /// Returns the announced category. Notification failures are logged and
    /// do not prevent the announcement from being recorded.
    pub async fn evaluate(&self, current: AqiCategory) -> Result<Option<AqiCategory>, AlertError> {
        // ---
        let window = self.ledger.recent_categories(self.window).await?;
        let last = self.ledger.last_announced().await?;

        let Some(category) = decide(&window, current, last) else {
            tracing::debug!(
                samples = window.len(),
                ?last,
                "no alert transition"
            );
            return Ok(None);
        };

        tracing::info!("New alert status: {}", category);

        if let Err(e) = self
            .notifier
            .notify(&self.recipients, alert_message(category))
            .await
        {
            tracing::warn!("Failed to deliver alert '{}': {}", category, e);
        }

        self.ledger.record_announcement(category).await?;
        Ok(Some(category))
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use std::sync::Mutex;
    use crate::aqi::AqiCategory::*;

    #[test]
    fn test_decide_uniform_change_announces() {
        assert_eq!(
            decide(&[Moderate, Moderate, Moderate], Moderate, Some(Good)),
            Some(Moderate)
        );
    }

    #[test]
    fn test_decide_mixed_window_is_silent() {
        assert_eq!(decide(&[Moderate, Good, Moderate], Moderate, Some(Good)), None);
    }

    #[test]
    fn test_decide_steady_state_is_silent() {
        // ---
        assert_eq!(decide(&[Good, Good], Good, Some(Good)), None);
        assert_eq!(decide(&[Good, Good], Good, None), None);
    }

    #[test]
    fn test_decide_empty_window_uses_current() {
        // ---
        assert_eq!(decide(&[], Unhealthy, None), Some(Unhealthy));
        assert_eq!(decide(&[], Good, None), None);
    }

    #[test]
    fn test_decide_recovery_back_to_good() {
        assert_eq!(decide(&[Good, Good, Good], Good, Some(Hazardous)), Some(Good));
    }

    #[test]
    fn test_every_category_has_a_message() {
        // ---
        for category in AqiCategory::ALL {
            assert!(!alert_message(category).is_empty());
        }
        assert!(alert_message(Good).contains("go outside"));
    }

    #[derive(Default)]
    struct MemoryLedger {
        window: Mutex<Vec<AqiCategory>>,
        announced: Mutex<Vec<AqiCategory>>,
    }

    #[async_trait]
    impl AlertLedger for MemoryLedger {
        async fn recent_categories(&self, _window: Duration) -> Result<Vec<AqiCategory>, AlertError> {
            Ok(self.window.lock().unwrap().clone())
        }

        async fn last_announced(&self) -> Result<Option<AqiCategory>, AlertError> {
            Ok(self.announced.lock().unwrap().last().copied())
        }

        async fn record_announcement(&self, category: AqiCategory) -> Result<(), AlertError> {
            self.announced.lock().unwrap().push(category);
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<(Vec<String>, String)>>,
        fail: bool,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, recipients: &[String], text: &str) -> Result<(), AlertError> {
            if self.fail {
                return Err(AlertError::Notify("gateway down".into()));
            }
            self.sent
                .lock()
                .unwrap()
                .push((recipients.to_vec(), text.to_string()));
            Ok(())
        }
    }

    fn engine(ledger: Arc<MemoryLedger>, notifier: Arc<RecordingNotifier>) -> AlertEngine {
        AlertEngine::new(
            ledger,
            notifier,
            vec!["HIJKLMN".into(), "OPQRSTU".into()],
            Duration::from_secs(15 * 60),
        )
    }

    #[tokio::test]
    async fn test_engine_announces_once() {
        // ---
        let ledger = Arc::new(MemoryLedger::default());
        *ledger.window.lock().unwrap() = vec![Moderate, Moderate, Moderate];
        let notifier = Arc::new(RecordingNotifier::default());
        let engine = engine(ledger.clone(), notifier.clone());

        assert_eq!(engine.evaluate(Moderate).await.unwrap(), Some(Moderate));
        assert_eq!(engine.evaluate(Moderate).await.unwrap(), None);

        assert_eq!(*ledger.announced.lock().unwrap(), vec![Moderate]);
        let sent = notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, vec!["HIJKLMN".to_string(), "OPQRSTU".to_string()]);
        assert_eq!(sent[0].1, alert_message(Moderate));
    }

    #[tokio::test]
    async fn test_engine_records_even_if_delivery_fails() {
        // ---
        let ledger = Arc::new(MemoryLedger::default());
        *ledger.window.lock().unwrap() = vec![Unhealthy];
        let notifier = Arc::new(RecordingNotifier {
            fail: true,
            ..Default::default()
        });

        let announced = engine(ledger.clone(), notifier).evaluate(Unhealthy).await.unwrap();

        assert_eq!(announced, Some(Unhealthy));
        assert_eq!(*ledger.announced.lock().unwrap(), vec![Unhealthy]);
    }
}
