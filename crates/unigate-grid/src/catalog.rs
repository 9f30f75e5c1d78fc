use std::time::Duration;

/// Grid services, addressed as `/v1/proxygrid/{category}/{service}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GridService {
    YoutubeTranscript,
    YoutubeInfo,
    YoutubeSearch,
    GoogleSearch,
    BingSearch,
    Similarweb,
    Crunchbase,
    WebMarkdown,
    Screenshot,
    Reddit,
    Hackernews,
    Twitter,
    Instagram,
    Tiktok,
    Amazon,
}

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;

impl GridService {
    pub fn resolve(category: &str, service: &str) -> Option<Self> {
        match (category, service) {
            ("youtube", "transcript") => Some(GridService::YoutubeTranscript),
            ("youtube", "info") => Some(GridService::YoutubeInfo),
            ("search", "youtube") => Some(GridService::YoutubeSearch),
            ("search", "google") => Some(GridService::GoogleSearch),
            ("search", "bing") => Some(GridService::BingSearch),
            ("data", "similarweb") => Some(GridService::Similarweb),
            ("data", "crunchbase") => Some(GridService::Crunchbase),
            ("web", "markdown") => Some(GridService::WebMarkdown),
            ("web", "screenshot") => Some(GridService::Screenshot),
            ("social", "reddit") => Some(GridService::Reddit),
            ("social", "hackernews") => Some(GridService::Hackernews),
            ("social", "twitter") => Some(GridService::Twitter),
            ("social", "instagram") => Some(GridService::Instagram),
            ("social", "tiktok") => Some(GridService::Tiktok),
            ("data", "amazon") => Some(GridService::Amazon),
            _ => None,
        }
    }

    /// Upstream path below the grid base URL.
    pub fn upstream_path(&self) -> &'static str {
        match self {
            GridService::YoutubeTranscript => "youtube/transcript",
            GridService::YoutubeInfo => "youtube/info",
            GridService::YoutubeSearch => "search/youtube",
            GridService::GoogleSearch => "search/google",
            GridService::BingSearch => "search/bing",
            GridService::Similarweb => "data/similarweb",
            GridService::Crunchbase => "data/crunchbase",
            GridService::WebMarkdown => "web/markdown",
            GridService::Screenshot => "web/screenshot",
            GridService::Reddit => "social/reddit",
            GridService::Hackernews => "social/hackernews",
            GridService::Twitter => "social/twitter",
            GridService::Instagram => "social/instagram",
            GridService::Tiktok => "social/tiktok",
            GridService::Amazon => "data/amazon",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            GridService::YoutubeTranscript => "youtube_transcript",
            GridService::YoutubeInfo => "youtube_info",
            GridService::YoutubeSearch => "youtube_search",
            GridService::GoogleSearch => "google_search",
            GridService::BingSearch => "bing_search",
            GridService::Similarweb => "similarweb",
            GridService::Crunchbase => "crunchbase",
            GridService::WebMarkdown => "web_markdown",
            GridService::Screenshot => "screenshot",
            GridService::Reddit => "reddit",
            GridService::Hackernews => "hackernews",
            GridService::Twitter => "twitter",
            GridService::Instagram => "instagram",
            GridService::Tiktok => "tiktok",
            GridService::Amazon => "amazon",
        }
    }

    /// Fixed TTL table.
    pub fn ttl(&self) -> Duration {
        let secs = match self {
            GridService::YoutubeTranscript => 30 * DAY,
            GridService::YoutubeInfo => 7 * DAY,
            GridService::YoutubeSearch | GridService::GoogleSearch | GridService::BingSearch => {
                4 * HOUR
            }
            GridService::Similarweb | GridService::Crunchbase => 7 * DAY,
            GridService::WebMarkdown => DAY,
            GridService::Screenshot => HOUR,
            GridService::Reddit | GridService::Hackernews => 15 * MINUTE,
            GridService::Twitter => HOUR,
            GridService::Instagram | GridService::Tiktok | GridService::Amazon => DAY,
        };
        Duration::from_secs(secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_table_matches_contract() {
        assert_eq!(GridService::YoutubeTranscript.ttl(), Duration::from_secs(30 * DAY));
        assert_eq!(GridService::GoogleSearch.ttl(), Duration::from_secs(4 * HOUR));
        assert_eq!(GridService::Reddit.ttl(), Duration::from_secs(15 * MINUTE));
        assert_eq!(GridService::Screenshot.ttl(), Duration::from_secs(HOUR));
        assert_eq!(GridService::Amazon.ttl(), Duration::from_secs(DAY));
    }

    #[test]
    fn unknown_service_resolves_to_none() {
        assert_eq!(GridService::resolve("search", "google"), Some(GridService::GoogleSearch));
        assert_eq!(GridService::resolve("search", "altavista"), None);
    }
}
