//! Callback routes
//!
//! Each platform returns to `/callback/{slug}` with `code`, `state` or
//! `error` in the query string. Hosts may pass either the in-app path or the
//! full URL.

use crate::error::{LinkError, Result};
use crate::types::{CallbackParams, PlatformKind};
use url::Url;

const CALLBACK_SEGMENT: &str = "callback";

/// A parsed platform return redirect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackRoute {
    pub platform: PlatformKind,
    pub params: CallbackParams,
}

impl CallbackRoute {
    /// In-app path of a platform's callback route.
    pub fn path_for(platform: PlatformKind) -> String {
        format!("/{}/{}", CALLBACK_SEGMENT, platform.slug())
    }

    /// Parses `/callback/{slug}?...`, optionally behind a path prefix or as
    /// an absolute URL.
    ///
    /// # Examples
    ///
    /// ```
    /// use core_link::{CallbackRoute, PlatformKind};
    ///
    /// let route = CallbackRoute::parse("/callback/3shape?code=abc123&state=null").unwrap();
    /// assert_eq!(route.platform, PlatformKind::ThreeShape);
    /// assert_eq!(route.params.code.as_deref(), Some("abc123"));
    /// assert_eq!(route.params.state, None);
    /// ```
    pub fn parse(input: &str) -> Result<Self> {
        let url = match Url::parse(input) {
            Ok(url) => url,
            Err(url::ParseError::RelativeUrlWithoutBase) => Url::parse("http://app.invalid/")
                .and_then(|base| base.join(input))
                .map_err(|e| LinkError::InvalidRoute(format!("{}: {}", input, e)))?,
            Err(e) => return Err(LinkError::InvalidRoute(format!("{}: {}", input, e))),
        };

        let segments: Vec<&str> = url
            .path_segments()
            .map(|segments| segments.filter(|s| !s.is_empty()).collect())
            .unwrap_or_default();

        let slug = match segments.as_slice() {
            [.., marker, slug] if *marker == CALLBACK_SEGMENT => *slug,
            _ => {
                return Err(LinkError::InvalidRoute(format!(
                    "{} is not a callback route",
                    url.path()
                )))
            }
        };

        let platform =
            PlatformKind::parse(slug).ok_or_else(|| LinkError::UnknownPlatform(slug.to_string()))?;

        Ok(Self {
            platform,
            params: CallbackParams::from_pairs(url.query_pairs()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_relative_route() {
        let route = CallbackRoute::parse("/callback/meditlink?code=abc123&state=xyz").unwrap();
        assert_eq!(route.platform, PlatformKind::MeditLink);
        assert_eq!(route.params.code.as_deref(), Some("abc123"));
        assert_eq!(route.params.state.as_deref(), Some("xyz"));
    }

    #[test]
    fn test_parses_absolute_url_with_prefix() {
        let route = CallbackRoute::parse(
            "https://lab.example/app/callback/3shape/?error=access_denied&error_description=User%20cancelled",
        )
        .unwrap();
        assert_eq!(route.platform, PlatformKind::ThreeShape);
        assert_eq!(route.params.error.as_deref(), Some("access_denied"));
        assert_eq!(
            route.params.error_description.as_deref(),
            Some("User cancelled")
        );
        assert_eq!(route.params.code, None);
    }

    #[test]
    fn test_decodes_query_values() {
        let route = CallbackRoute::parse("/callback/meditlink?code=a%2Bb%3D").unwrap();
        assert_eq!(route.params.code.as_deref(), Some("a+b="));
    }

    #[test]
    fn test_rejects_unknown_platform_and_other_paths() {
        assert_eq!(
            CallbackRoute::parse("/callback/exocad?code=1"),
            Err(LinkError::UnknownPlatform("exocad".to_string()))
        );
        assert!(matches!(
            CallbackRoute::parse("/dashboard/meditlink"),
            Err(LinkError::InvalidRoute(_))
        ));
    }

    #[test]
    fn test_path_for_round_trips() {
        for platform in PlatformKind::ALL {
            let route = CallbackRoute::parse(&CallbackRoute::path_for(platform)).unwrap();
            assert_eq!(route.platform, platform);
            assert_eq!(route.params, CallbackParams::default());
        }
    }
}
