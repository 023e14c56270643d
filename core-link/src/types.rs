use crate::error::LinkError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier of one callback flow, used to correlate logs and events.
///
/// # Examples
///
/// ```
/// use core_link::FlowId;
///
/// let a = FlowId::new();
/// let b = FlowId::new();
/// assert_ne!(a, b);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowId(Uuid);

impl FlowId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a flow ID from its string form.
    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for FlowId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// External platforms that can be linked.
///
/// # Examples
///
/// ```
/// use core_link::PlatformKind;
///
/// let platform = PlatformKind::ThreeShape;
/// assert_eq!(platform.slug(), "3shape");
/// assert_eq!(platform.display_name(), "3Shape");
/// assert_eq!(PlatformKind::parse("meditlink"), Some(PlatformKind::MeditLink));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PlatformKind {
    /// Medit Link scan platform
    MeditLink,
    /// 3Shape communicate platform
    ThreeShape,
}

impl PlatformKind {
    /// Every supported platform, in dashboard order.
    pub const ALL: [PlatformKind; 2] = [PlatformKind::MeditLink, PlatformKind::ThreeShape];

    /// Human-readable platform name.
    pub fn display_name(&self) -> &'static str {
        match self {
            PlatformKind::MeditLink => "Medit Link",
            PlatformKind::ThreeShape => "3Shape",
        }
    }

    /// Path segment used by the backend and by callback routes.
    pub fn slug(&self) -> &'static str {
        match self {
            PlatformKind::MeditLink => "meditlink",
            PlatformKind::ThreeShape => "3shape",
        }
    }

    /// Message type posted to the opener window when a popup flow succeeds.
    pub fn success_message_type(&self) -> &'static str {
        match self {
            PlatformKind::MeditLink => "MEDITLINK_AUTH_SUCCESS",
            PlatformKind::ThreeShape => "3SHAPE_AUTH_SUCCESS",
        }
    }

    /// Parse a platform from a slug or identifier, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "meditlink" | "medit_link" | "medit-link" | "medit" => Some(PlatformKind::MeditLink),
            "3shape" | "threeshape" | "three_shape" | "three-shape" => {
                Some(PlatformKind::ThreeShape)
            }
            _ => None,
        }
    }
}

impl fmt::Display for PlatformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Phase of a callback flow.
///
/// ```text
/// Loading -> Success            (terminal)
/// Loading -> Error -> Loading   (manual retry only)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum LinkPhase {
    #[default]
    Loading,
    Success,
    Error,
}

impl LinkPhase {
    pub fn is_settled(&self) -> bool {
        !matches!(self, LinkPhase::Loading)
    }
}

/// External account that was linked.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedUser {
    pub name: String,
    pub email: String,
    pub group_name: Option<String>,
}

impl fmt::Debug for LinkedUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkedUser")
            .field("name", &self.name)
            .field("email", &"[REDACTED]")
            .field("group_name", &self.group_name)
            .finish()
    }
}

/// Query parameters carried by the platform's return redirect.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl CallbackParams {
    /// Redirect carrying an authorization code.
    pub fn with_code(code: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            ..Self::default()
        }
    }

    /// Redirect carrying an authorization error.
    pub fn with_error(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn state(mut self, state: impl Into<String>) -> Self {
        self.state = normalize_state(Some(state.into()));
        self
    }

    /// Builds params from decoded query pairs. Blank values are dropped and
    /// a `state` of `"null"` counts as absent.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut params = Self::default();
        for (key, value) in pairs {
            let value = non_blank(value.into());
            match key.as_ref() {
                "code" => params.code = value,
                "state" => params.state = normalize_state(value),
                "error" => params.error = value,
                "error_description" => params.error_description = value,
                _ => {}
            }
        }
        params
    }
}

impl fmt::Debug for CallbackParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackParams")
            .field("code", &self.code.as_ref().map(|_| "[REDACTED]"))
            .field("state", &self.state)
            .field("error", &self.error)
            .field("error_description", &self.error_description)
            .finish()
    }
}

fn non_blank(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

pub(crate) fn normalize_state(state: Option<String>) -> Option<String> {
    state
        .and_then(non_blank)
        .filter(|s| s.trim() != "null")
}

/// In-memory record of one platform's linking attempt.
#[derive(Clone, PartialEq, Eq)]
pub struct LinkSession {
    pub platform: PlatformKind,
    pub phase: LinkPhase,
    /// Automatic retries performed so far
    pub attempt: u32,
    /// Present only once `phase` is `Success`
    pub linked_user: Option<LinkedUser>,
    pub message: String,
    /// Present only while `phase` is `Error`
    pub error: Option<LinkError>,
    pub code: Option<String>,
    pub state: Option<String>,
}

impl LinkSession {
    pub fn new(platform: PlatformKind) -> Self {
        Self {
            platform,
            phase: LinkPhase::Loading,
            attempt: 0,
            linked_user: None,
            message: format!("Finalizing {} link...", platform.display_name()),
            error: None,
            code: None,
            state: None,
        }
    }

    pub fn is_linked(&self) -> bool {
        self.phase == LinkPhase::Success
    }
}

impl fmt::Debug for LinkSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkSession")
            .field("platform", &self.platform)
            .field("phase", &self.phase)
            .field("attempt", &self.attempt)
            .field("linked_user", &self.linked_user)
            .field("message", &self.message)
            .field("error", &self.error)
            .field("code", &self.code.as_ref().map(|_| "[REDACTED]"))
            .field("state", &self.state)
            .finish()
    }
}

/// Cached linking status of one platform.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthStatusSnapshot {
    pub authenticated: bool,
    pub user: Option<LinkedUser>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl AuthStatusSnapshot {
    pub fn unauthenticated() -> Self {
        Self::default()
    }
}

/// Action offered on the status card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CardAction {
    Retry,
    ContinueNow,
    ReturnToDashboard,
}

/// The single user-visible card rendered by the callback view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCard {
    pub phase: LinkPhase,
    pub title: String,
    pub message: String,
    pub actions: Vec<CardAction>,
}

impl StatusCard {
    /// Composes the card for a session snapshot.
    ///
    /// `redirect_pending` is true while a primary-window completion is
    /// waiting to navigate; it enables "continue now".
    pub fn compose(session: &LinkSession, redirect_pending: bool) -> Self {
        let name = session.platform.display_name();
        match session.phase {
            LinkPhase::Loading => Self {
                phase: LinkPhase::Loading,
                title: format!("Linking {}", name),
                message: session.message.clone(),
                actions: Vec::new(),
            },
            LinkPhase::Success => Self {
                phase: LinkPhase::Success,
                title: format!("{} linked", name),
                message: session.message.clone(),
                actions: if redirect_pending {
                    vec![CardAction::ContinueNow]
                } else {
                    Vec::new()
                },
            },
            LinkPhase::Error => {
                let retryable = session.error.as_ref().is_some_and(LinkError::is_retryable);
                let actions = if retryable {
                    vec![CardAction::Retry, CardAction::ReturnToDashboard]
                } else {
                    vec![CardAction::ReturnToDashboard]
                };
                Self {
                    phase: LinkPhase::Error,
                    title: format!("Could not link {}", name),
                    message: session.message.clone(),
                    actions,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flow_id_round_trips_through_string() {
        let id = FlowId::new();
        let parsed = FlowId::from_string(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
        assert!(FlowId::from_string("not-a-uuid").is_err());
    }

    #[test]
    fn test_platform_identifiers() {
        assert_eq!(PlatformKind::MeditLink.slug(), "meditlink");
        assert_eq!(PlatformKind::ThreeShape.slug(), "3shape");
        assert_eq!(
            PlatformKind::MeditLink.success_message_type(),
            "MEDITLINK_AUTH_SUCCESS"
        );
        assert_eq!(
            PlatformKind::ThreeShape.success_message_type(),
            "3SHAPE_AUTH_SUCCESS"
        );
        assert_eq!(PlatformKind::ThreeShape.to_string(), "3Shape");
    }

    #[test]
    fn test_platform_parse() {
        assert_eq!(PlatformKind::parse("MeditLink"), Some(PlatformKind::MeditLink));
        assert_eq!(PlatformKind::parse("3SHAPE"), Some(PlatformKind::ThreeShape));
        assert_eq!(PlatformKind::parse("three_shape"), Some(PlatformKind::ThreeShape));
        assert_eq!(PlatformKind::parse("exocad"), None);
    }

    #[test]
    fn test_callback_params_from_pairs() {
        let params = CallbackParams::from_pairs([
            ("code", "abc123"),
            ("state", "null"),
            ("utm_source", "mail"),
        ]);
        assert_eq!(params.code.as_deref(), Some("abc123"));
        assert_eq!(params.state, None);
        assert_eq!(params.error, None);

        let params = CallbackParams::from_pairs([("code", ""), ("state", "  ")]);
        assert_eq!(params.code, None);
        assert_eq!(params.state, None);
    }

    #[test]
    fn test_callback_params_debug_redacts_code() {
        let params = CallbackParams::with_code("abc123").state("xyz");
        let debug = format!("{:?}", params);
        assert!(!debug.contains("abc123"));
        assert!(debug.contains("xyz"));
    }

    #[test]
    fn test_linked_user_debug_redacts_email() {
        let user = LinkedUser {
            name: "Jane Doe".to_string(),
            email: "jane@lab.example".to_string(),
            group_name: None,
        };
        let debug = format!("{:?}", user);
        assert!(debug.contains("Jane Doe"));
        assert!(!debug.contains("jane@lab.example"));
    }

    #[test]
    fn test_card_for_retryable_error() {
        let mut session = LinkSession::new(PlatformKind::MeditLink);
        session.phase = LinkPhase::Error;
        session.error = Some(LinkError::TransientAuth { attempts: 3 });
        session.message = "could not finalize linking after 3 attempts".to_string();

        let card = StatusCard::compose(&session, false);
        assert_eq!(card.title, "Could not link Medit Link");
        assert_eq!(
            card.actions,
            vec![CardAction::Retry, CardAction::ReturnToDashboard]
        );
    }

    #[test]
    fn test_card_for_rejected_authorization() {
        let mut session = LinkSession::new(PlatformKind::ThreeShape);
        session.phase = LinkPhase::Error;
        session.error = Some(LinkError::RejectedByUser {
            reason: "access_denied".to_string(),
        });

        let card = StatusCard::compose(&session, false);
        assert_eq!(card.actions, vec![CardAction::ReturnToDashboard]);
    }

    #[test]
    fn test_card_for_success_with_pending_redirect() {
        let mut session = LinkSession::new(PlatformKind::MeditLink);
        session.phase = LinkPhase::Success;

        assert_eq!(
            StatusCard::compose(&session, true).actions,
            vec![CardAction::ContinueNow]
        );
        assert!(StatusCard::compose(&session, false).actions.is_empty());
    }
}
