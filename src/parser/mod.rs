//! HLS Parser (C1, §4.1). Pure and synchronous: takes a manifest body and its
//! base URL, produces either a [`Master`] or a [`Media`] playlist. Built on
//! `m3u8-rs`, the parsing crate the `rust-srec` HLS engine in the retrieval
//! pack depends on, rather than a hand-rolled tag scanner.

use crate::error::ParseError;
use m3u8_rs::Playlist;
use url::Url;

/// One variant stream listed in a master playlist.
#[derive(Debug, Clone, PartialEq)]
pub struct Variant {
    pub bandwidth: u64,
    pub resolution: Option<(u64, u64)>,
    pub codecs: Option<String>,
    pub absolute_uri: Url,
}

/// A master playlist: an ordered list of variants (§4.1).
#[derive(Debug, Clone, PartialEq)]
pub struct Master {
    pub variants: Vec<Variant>,
}

impl Master {
    /// The variant with the highest bandwidth, per §4.7 step 2 ("pick the
    /// highest-bandwidth variant").
    pub fn highest_bandwidth(&self) -> Option<&Variant> {
        self.variants.iter().max_by_key(|v| v.bandwidth)
    }
}

/// One segment listed in a media playlist.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub absolute_uri: Url,
    pub duration_sec: f32,
    pub discontinuity: bool,
}

/// A media playlist (§4.1).
#[derive(Debug, Clone, PartialEq)]
pub struct Media {
    pub target_duration_sec: f32,
    pub media_sequence: u64,
    pub is_endlist: bool,
    pub segments: Vec<Segment>,
}

impl Media {
    /// The second-most-recent segment, per §4.7 step 2 ("most recent is
    /// often still being produced"). `None` if there are fewer than two
    /// segments.
    pub fn second_most_recent(&self) -> Option<&Segment> {
        if self.segments.len() < 2 {
            return None;
        }
        self.segments.get(self.segments.len() - 2)
    }
}

/// Result of parsing a manifest body (§4.1): either a master or a media
/// playlist.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedManifest {
    Master(Master),
    Media(Media),
}

/// Parse a manifest body, resolving all relative URIs against `base_url`.
/// Fails with [`ParseError::NotHls`] when the body does not start with the
/// HLS magic line, or [`ParseError::Malformed`] when required tags are
/// missing (§4.1).
pub fn parse(body: &[u8], base_url: &str) -> Result<ParsedManifest, ParseError> {
    if !body.starts_with(b"#EXTM3U") {
        return Err(ParseError::NotHls);
    }
    let base = Url::parse(base_url)?;

    let playlist =
        m3u8_rs::parse_playlist_res(body).map_err(|e| ParseError::Malformed(format!("{e:?}")))?;

    match playlist {
        Playlist::MasterPlaylist(master) => {
            if master.variants.is_empty() {
                return Err(ParseError::Malformed(
                    "master playlist has no variants".to_string(),
                ));
            }
            let mut variants = Vec::with_capacity(master.variants.len());
            for v in master.variants {
                let absolute_uri = resolve(&base, &v.uri)?;
                variants.push(Variant {
                    bandwidth: v.bandwidth,
                    resolution: v.resolution.map(|r| (r.width, r.height)),
                    codecs: v.codecs,
                    absolute_uri,
                });
            }
            Ok(ParsedManifest::Master(Master { variants }))
        }
        Playlist::MediaPlaylist(media) => {
            if media.segments.is_empty() && !media.end_list {
                return Err(ParseError::Malformed(
                    "media playlist has no segments and is not ended".to_string(),
                ));
            }
            let mut segments = Vec::with_capacity(media.segments.len());
            for s in media.segments {
                let absolute_uri = resolve(&base, &s.uri)?;
                segments.push(Segment {
                    absolute_uri,
                    duration_sec: s.duration,
                    discontinuity: s.discontinuity,
                });
            }
            Ok(ParsedManifest::Media(Media {
                target_duration_sec: media.target_duration,
                media_sequence: media.media_sequence,
                is_endlist: media.end_list,
                segments,
            }))
        }
    }
}

fn resolve(base: &Url, uri: &str) -> Result<Url, ParseError> {
    base.join(uri).map_err(ParseError::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MASTER: &str = "#EXTM3U\n\
#EXT-X-STREAM-INF:BANDWIDTH=1280000,RESOLUTION=640x360\n\
low/index.m3u8\n\
#EXT-X-STREAM-INF:BANDWIDTH=4500000,RESOLUTION=1920x1080\n\
high/index.m3u8\n";

    const MEDIA: &str = "#EXTM3U\n\
#EXT-X-TARGETDURATION:6\n\
#EXT-X-MEDIA-SEQUENCE:100\n\
#EXTINF:6.0,\n\
seg100.ts\n\
#EXTINF:6.0,\n\
seg101.ts\n\
#EXTINF:6.0,\n\
seg102.ts\n";

    #[test]
    fn parses_master_and_resolves_uris() {
        let parsed = parse(MASTER.as_bytes(), "https://cdn.example.com/stream/").unwrap();
        match parsed {
            ParsedManifest::Master(m) => {
                assert_eq!(m.variants.len(), 2);
                let top = m.highest_bandwidth().unwrap();
                assert_eq!(top.bandwidth, 4500000);
                assert_eq!(
                    top.absolute_uri.as_str(),
                    "https://cdn.example.com/stream/high/index.m3u8"
                );
            }
            ParsedManifest::Media(_) => panic!("expected master"),
        }
    }

    #[test]
    fn parses_media_and_picks_second_most_recent() {
        let parsed = parse(MEDIA.as_bytes(), "https://cdn.example.com/stream/").unwrap();
        match parsed {
            ParsedManifest::Media(m) => {
                assert_eq!(m.segments.len(), 3);
                let picked = m.second_most_recent().unwrap();
                assert!(picked.absolute_uri.as_str().ends_with("seg101.ts"));
            }
            ParsedManifest::Master(_) => panic!("expected media"),
        }
    }

    #[test]
    fn rejects_non_hls_body() {
        let err = parse(b"not an hls file", "https://cdn.example.com/").unwrap_err();
        assert!(matches!(err, ParseError::NotHls));
    }

    #[test]
    fn tolerates_unknown_tags() {
        let body = "#EXTM3U\n#EXT-X-UNKNOWN-TAG:foo\n#EXT-X-TARGETDURATION:6\n#EXT-X-MEDIA-SEQUENCE:1\n#EXTINF:6.0,\nseg1.ts\n#EXTINF:6.0,\nseg2.ts\n";
        let parsed = parse(body.as_bytes(), "https://cdn.example.com/").unwrap();
        assert!(matches!(parsed, ParsedManifest::Media(_)));
    }
}
