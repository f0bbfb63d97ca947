use crate::status::Status;
use hashbrown::HashMap;

/// Parsed `key=value&key=value` attribute string. Keys are matched
/// case-sensitively; values are kept verbatim.
#[derive(Debug, Clone)]
pub struct Attrs {
    entries: HashMap<String, String>,
}

impl Attrs {
    /// An attribute map with nothing in it, used for tags that fail before
    /// their attributes parse.
    pub(crate) fn empty() -> Attrs {
        Attrs {
            entries: HashMap::new(),
        }
    }

    /// Parse an ampersand-delimited attribute string. Empty segments are
    /// skipped; a segment without a key is a parameter error. A segment
    /// without `=` is kept as a key with an empty value so presence checks
    /// (e.g. `read_group`) work.
    pub fn parse(attr_str: &str) -> Result<Attrs, Status> {
        if attr_str.is_empty() {
            return Err(Status::BadParam);
        }

        let mut entries = HashMap::new();

        for segment in attr_str.split('&') {
            if segment.is_empty() {
                continue;
            }

            let (key, value) = match segment.find('=') {
                Some(idx) => (&segment[..idx], &segment[idx + 1..]),
                None => (segment, ""),
            };

            if key.is_empty() {
                return Err(Status::BadParam);
            }

            entries.insert(key.to_owned(), value.to_owned());
        }

        Ok(Attrs { entries })
    }

    #[inline]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    #[inline]
    pub fn get_str<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    /// Integer lookup; missing or unparseable values fall back to the
    /// default rather than erroring.
    #[inline]
    pub fn get_int(&self, key: &str, default: i64) -> i64 {
        self.get(key)
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(default)
    }

    #[inline]
    pub fn has(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }
}
