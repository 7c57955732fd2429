use super::ScreenContext;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionAction {
    View,
    Click,
    Favorite,
    Purchase,
    Share,
}

impl InteractionAction {
    /// Signal strength used for interest and budget aggregation
    pub fn weight(&self) -> f64 {
        match self {
            InteractionAction::View => 1.0,
            InteractionAction::Click => 2.0,
            InteractionAction::Favorite => 3.0,
            InteractionAction::Share => 3.0,
            InteractionAction::Purchase => 5.0,
        }
    }

    /// Weight applied to the screen price when deriving a budget range
    pub fn budget_weight(&self) -> f64 {
        match self {
            InteractionAction::View => 0.5,
            InteractionAction::Click => 1.0,
            InteractionAction::Favorite | InteractionAction::Share => 2.0,
            InteractionAction::Purchase => 3.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InteractionAction::View => "view",
            InteractionAction::Click => "click",
            InteractionAction::Favorite => "favorite",
            InteractionAction::Purchase => "purchase",
            InteractionAction::Share => "share",
        }
    }
}

/// Action-specific metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum InteractionDetail {
    View { duration_secs: Option<u32> },
    Click { section_id: Option<String> },
    Favorite,
    Purchase { amount: f64, booking_days: u32 },
    Share { channel: Option<String> },
}

impl InteractionDetail {
    pub fn action(&self) -> InteractionAction {
        match self {
            InteractionDetail::View { .. } => InteractionAction::View,
            InteractionDetail::Click { .. } => InteractionAction::Click,
            InteractionDetail::Favorite => InteractionAction::Favorite,
            InteractionDetail::Purchase { .. } => InteractionAction::Purchase,
            InteractionDetail::Share { .. } => InteractionAction::Share,
        }
    }

    pub fn view_duration_secs(&self) -> Option<u32> {
        match self {
            InteractionDetail::View { duration_secs } => *duration_secs,
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionContext {
    pub session_id: String,
    pub device: String,
}

impl Default for InteractionContext {
    fn default() -> Self {
        Self {
            session_id: "default".to_string(),
            device: "web".to_string(),
        }
    }
}

/// Recorded user event. Never mutated after it enters the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub user_id: String,
    pub screen_id: String,
    pub detail: InteractionDetail,
    pub timestamp: DateTime<Utc>,
    pub context: InteractionContext,
    pub screen: ScreenContext,
}

impl Interaction {
    pub fn new(
        user_id: impl Into<String>,
        screen: ScreenContext,
        detail: InteractionDetail,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            screen_id: screen.screen_id.clone(),
            detail,
            timestamp,
            context: InteractionContext::default(),
            screen,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.context.session_id = session_id.into();
        self
    }

    pub fn action(&self) -> InteractionAction {
        self.detail.action()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Screen, ScreenCategory};

    #[test]
    fn test_detail_maps_to_action() {
        let screen = Screen::new("s1", "Berlin", ScreenCategory::Mall, 100.0, 4.0);
        let interaction = Interaction::new(
            "u1",
            screen.context(),
            InteractionDetail::Purchase {
                amount: 700.0,
                booking_days: 7,
            },
            Utc::now(),
        );
        assert_eq!(interaction.action(), InteractionAction::Purchase);
        assert_eq!(interaction.screen_id, "s1");
    }

    #[test]
    fn test_detail_serializes_tagged() {
        let detail = InteractionDetail::View {
            duration_secs: Some(42),
        };
        let json = serde_json::to_value(&detail).unwrap();
        assert_eq!(json["action"], "view");
        assert_eq!(json["duration_secs"], 42);
    }
}
