//! HTTP resource fetcher. A thin synchronous wrapper over
//! `reqwest::blocking`, used by the composer (C9) to pull the shell project
//! archive, companion Java sources, plugin binaries, and the font asset —
//! all through [`crate::cache`].

use std::time::Duration;

use snafu::Snafu;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("network error fetching {url}: {source}"))]
    Network { url: String, source: reqwest::Error },

    #[snafu(display("HTTP error fetching {url}: status {status}"))]
    Http { url: String, status: u16 },

    #[snafu(display("timed out fetching {url} after {timeout:?}"))]
    Timeout { url: String, timeout: Duration },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

pub struct Fetcher {
    client: reqwest::blocking::Client,
    timeout: Duration,
}

impl Fetcher {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::blocking::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(10))
            .timeout(timeout)
            .build()
            .expect("reqwest client configuration is valid");
        Fetcher { client, timeout }
    }

    pub fn get(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.client.get(url).send().map_err(|source| {
            if source.is_timeout() {
                Error::Timeout {
                    url: url.to_string(),
                    timeout: self.timeout,
                }
            } else {
                Error::Network {
                    url: url.to_string(),
                    source,
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Http {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response.bytes().map(|b| b.to_vec()).map_err(|source| Error::Network {
            url: url.to_string(),
            source,
        })
    }
}

pub const SHELL_PROJECT_URL_TEMPLATE: &str =
    "https://github.com/uyjulian/krkrsdl2/releases/download/{version}/krkrsdl2-android-shell-{version}.zip";

pub const SDL2_SOURCES_COMMIT: &str = "53dea9830964eee8b5c2a7ee0a65d6e268dc78a1";

pub const SDL2_COMPANION_FILES: &[&str] = &[
    "SDLActivity",
    "SDL",
    "SDLAudioManager",
    "SDLControllerManager",
    "HIDDevice",
    "HIDDeviceManager",
    "HIDDeviceUSB",
    "HIDDeviceBLESteamController",
];

pub fn sdl2_companion_url(file_stem: &str) -> String {
    format!(
        "https://raw.githubusercontent.com/libsdl-org/SDL/{SDL2_SOURCES_COMMIT}/android-project/app/src/main/java/org/libsdl/app/{file_stem}.java"
    )
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn companion_url_embeds_pinned_commit_and_file_stem() {
        let url = sdl2_companion_url("SDLActivity");
        assert!(url.contains(SDL2_SOURCES_COMMIT));
        assert!(url.ends_with("SDLActivity.java"));
    }

    #[test]
    fn companion_file_set_matches_contract() {
        assert_eq!(SDL2_COMPANION_FILES.len(), 8);
        assert!(SDL2_COMPANION_FILES.contains(&"HIDDeviceBLESteamController"));
    }
}
