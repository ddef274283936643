//! Magic-byte inspection. The declared MIME type selects a matcher and the
//! leading bytes of the payload must satisfy it, whatever the client said.

use regex::Regex;
use std::{collections::HashMap, sync::LazyLock};

/// Bytes an ISO-BMFF `ftyp` check needs before it reads anything.
const ISO_BMFF_MIN_LEN: usize = 20;

/// Script elements, `javascript:` URLs and `on*=` event handler attributes,
/// matched against lower-cased markup. A handler may follow any separator
/// XML allows (`<svg/onload=`, a tab, a closing quote).
static ACTIVE_CONTENT: LazyLock<Result<Regex, regex::Error>> = LazyLock::new(|| {
    Regex::new(r#"<script|javascript\s*:|(?:^|[^a-z0-9_-])on[a-z]+\s*="#)
});

pub trait SignatureMatcher: Send + Sync {
    fn matches(&self, buffer: &[u8]) -> bool;
}

/// One or more alternative layouts, each a list of `(offset, bytes)` segments
/// that must all be present.
pub struct FixedPrefixSignature {
    alternatives: Vec<Vec<(usize, &'static [u8])>>,
}

impl FixedPrefixSignature {
    pub fn prefix(bytes: &'static [u8]) -> Self {
        Self {
            alternatives: vec![vec![(0, bytes)]],
        }
    }

    pub fn any_prefix(prefixes: &[&'static [u8]]) -> Self {
        Self {
            alternatives: prefixes.iter().map(|p| vec![(0, *p)]).collect(),
        }
    }

    pub fn segments(segments: &[(usize, &'static [u8])]) -> Self {
        Self {
            alternatives: vec![segments.to_vec()],
        }
    }
}

impl SignatureMatcher for FixedPrefixSignature {
    fn matches(&self, buffer: &[u8]) -> bool {
        self.alternatives.iter().any(|segments| {
            segments.iter().all(|(offset, expected)| {
                buffer
                    .get(*offset..offset + expected.len())
                    .is_some_and(|actual| actual == *expected)
            })
        })
    }
}

/// ISO Base Media File Format container: box size at 0, `ftyp` at 4 and the
/// major brand at 8.
pub struct IsoBmffBrandSignature {
    brands: Vec<[u8; 4]>,
}

impl IsoBmffBrandSignature {
    pub fn new(brands: &[&[u8; 4]]) -> Self {
        Self {
            brands: brands.iter().map(|b| **b).collect(),
        }
    }
}

impl SignatureMatcher for IsoBmffBrandSignature {
    fn matches(&self, buffer: &[u8]) -> bool {
        if buffer.len() < ISO_BMFF_MIN_LEN {
            return false;
        }
        let has_ftyp = &buffer[4..8] == b"ftyp";
        let brand_ok = self.brands.iter().any(|brand| &buffer[8..12] == brand);
        has_ftyp && brand_ok
    }
}

/// Text formats identified by their root element. The whole document is
/// scanned (its size is already capped by the structural checks) and any
/// active content fails the match.
pub struct MarkupSignature {
    roots: Vec<&'static str>,
}

impl MarkupSignature {
    pub fn svg() -> Self {
        Self {
            roots: vec!["<?xml", "<svg", "<!doctype svg"],
        }
    }
}

fn has_active_content(lowered: &str) -> bool {
    match &*ACTIVE_CONTENT {
        Ok(pattern) => pattern.is_match(lowered),
        // Fail closed.
        Err(_) => true,
    }
}

impl SignatureMatcher for MarkupSignature {
    fn matches(&self, buffer: &[u8]) -> bool {
        let body = buffer.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(buffer);
        let text = String::from_utf8_lossy(body);
        let lowered = text.trim_start().to_ascii_lowercase();

        let rooted = self.roots.iter().any(|root| lowered.starts_with(root));
        rooted && lowered.contains("<svg") && !has_active_content(&lowered)
    }
}

/// MIME type → matcher lookup.
pub struct SignatureTable {
    matchers: HashMap<&'static str, Box<dyn SignatureMatcher>>,
}

impl SignatureTable {
    pub fn empty() -> Self {
        Self {
            matchers: HashMap::new(),
        }
    }

    pub fn register(mut self, mime: &'static str, matcher: impl SignatureMatcher + 'static) -> Self {
        self.matchers.insert(mime, Box::new(matcher));
        self
    }

    /// Signatures for every MIME type either upload endpoint accepts.
    pub fn standard() -> Self {
        Self::empty()
            .register("image/jpeg", FixedPrefixSignature::prefix(&[0xFF, 0xD8, 0xFF]))
            .register(
                "image/png",
                FixedPrefixSignature::prefix(&[0x89, 0x50, 0x4E, 0x47]),
            )
            .register(
                "image/gif",
                FixedPrefixSignature::any_prefix(&[&b"GIF87a"[..], &b"GIF89a"[..]]),
            )
            .register(
                "image/webp",
                FixedPrefixSignature::segments(&[(0, &b"RIFF"[..]), (8, &b"WEBP"[..])]),
            )
            .register(
                "application/pdf",
                FixedPrefixSignature::prefix(&[0x25, 0x50, 0x44, 0x46]),
            )
            .register("image/avif", IsoBmffBrandSignature::new(&[b"avif"]))
            .register("image/heic", IsoBmffBrandSignature::new(HEIF_BRANDS))
            .register("image/heif", IsoBmffBrandSignature::new(HEIF_BRANDS))
            .register("image/svg+xml", MarkupSignature::svg())
    }

    pub fn has(&self, mime: &str) -> bool {
        self.matchers.contains_key(mime)
    }

    /// True when `buffer` carries the signature registered for `mime`.
    /// Types without a registered signature never validate.
    pub fn validate_signature(&self, buffer: &[u8], mime: &str) -> bool {
        let mime = mime.trim().to_ascii_lowercase();
        self.matchers
            .get(mime.as_str())
            .is_some_and(|matcher| matcher.matches(buffer))
    }
}

const HEIF_BRANDS: &[&[u8; 4]] = &[
    b"heic", b"heix", b"hevc", b"hevx", b"heim", b"heis", b"mif1", b"msf1", b"heif",
];
