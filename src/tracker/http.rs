//! HTTP tracker backend, contract level.

use crate::tracker::tracker::scrape_url_from;
use crate::tracker::types::{Dispatch, RequestState};

/// Exchange state for `http://` and `https://` trackers.
///
/// The wire protocol is driven by an external engine; this backend tracks
/// what is in flight and derives the scrape endpoint.
#[derive(Debug)]
pub(crate) struct HttpBackend {
    scrape_url: Option<String>,
    state: RequestState,
}

impl HttpBackend {
    pub(crate) fn new(url: &str) -> Self {
        Self {
            scrape_url: scrape_url_from(url).ok(),
            state: RequestState::Idle,
        }
    }

    pub(crate) fn can_scrape(&self) -> bool {
        self.scrape_url.is_some()
    }

    pub(crate) fn scrape_url(&self) -> Option<&str> {
        self.scrape_url.as_deref()
    }

    pub(crate) fn is_busy(&self) -> bool {
        self.state != RequestState::Idle
    }

    pub(crate) fn is_busy_not_scrape(&self) -> bool {
        self.state == RequestState::Announcing
    }

    pub(crate) fn start_announce(&mut self) -> Dispatch {
        self.state = RequestState::Announcing;
        Dispatch::Started
    }

    pub(crate) fn start_scrape(&mut self) -> Dispatch {
        if self.scrape_url.is_none() {
            return Dispatch::Failed("no scrape endpoint derivable from announce url".to_string());
        }

        self.state = RequestState::Scraping;
        Dispatch::Started
    }

    pub(crate) fn close(&mut self) {
        self.state = RequestState::Idle;
    }
}
