use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// One step into a document: an object field or a list index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Segment {
    Index(usize),
    Key(String),
}

impl Segment {
    pub fn key(name: impl Into<String>) -> Self {
        Segment::Key(name.into())
    }
}

impl From<usize> for Segment {
    fn from(index: usize) -> Self {
        Segment::Index(index)
    }
}

impl From<&str> for Segment {
    fn from(name: &str) -> Self {
        Segment::Key(name.to_string())
    }
}

/// Path from the document root, written `modules.text.chunked[0].chunks`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Keypath(Vec<Segment>);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeypathError {
    #[error("empty field name in keypath '{0}'")]
    EmptyField(String),

    #[error("bad index in keypath '{0}'")]
    BadIndex(String),
}

impl Keypath {
    pub fn root() -> Self {
        Keypath(Vec::new())
    }

    pub fn key(mut self, name: impl Into<String>) -> Self {
        self.0.push(Segment::Key(name.into()));
        self
    }

    pub fn index(mut self, index: usize) -> Self {
        self.0.push(Segment::Index(index));
        self
    }

    pub fn segments(&self) -> &[Segment] {
        &self.0
    }

    pub fn into_segments(self) -> Vec<Segment> {
        self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<Segment>> for Keypath {
    fn from(segments: Vec<Segment>) -> Self {
        Keypath(segments)
    }
}

impl fmt::Display for Keypath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("$");
        }
        for (i, segment) in self.0.iter().enumerate() {
            match segment {
                Segment::Key(name) if i == 0 => f.write_str(name)?,
                Segment::Key(name) => write!(f, ".{name}")?,
                Segment::Index(index) => write!(f, "[{index}]")?,
            }
        }
        Ok(())
    }
}

impl FromStr for Keypath {
    type Err = KeypathError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        if raw.is_empty() || raw == "$" {
            return Ok(Keypath::root());
        }
        let mut segments = Vec::new();
        for part in raw.split('.') {
            let (name, mut rest) = match part.find('[') {
                Some(at) => part.split_at(at),
                None => (part, ""),
            };
            if name.is_empty() && segments.is_empty() {
                return Err(KeypathError::EmptyField(raw.to_string()));
            }
            if !name.is_empty() {
                segments.push(Segment::key(name));
            }
            while !rest.is_empty() {
                let close = rest.find(']').ok_or_else(|| KeypathError::BadIndex(raw.to_string()))?;
                let index = rest[1..close]
                    .parse::<usize>()
                    .map_err(|_| KeypathError::BadIndex(raw.to_string()))?;
                segments.push(Segment::Index(index));
                rest = &rest[close + 1..];
                if !rest.is_empty() && !rest.starts_with('[') {
                    return Err(KeypathError::BadIndex(raw.to_string()));
                }
            }
        }
        Ok(Keypath(segments))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_displays_nested_paths() {
        let path: Keypath = "modules.text.chunked[2].chunks[0]".parse().unwrap();
        assert_eq!(
            path,
            Keypath::root().key("modules").key("text").key("chunked").index(2).key("chunks").index(0)
        );
        assert_eq!(path.to_string(), "modules.text.chunked[2].chunks[0]");
        assert_eq!("links.indexPairs[0][1]".parse::<Keypath>().unwrap().segments().len(), 4);
    }

    #[test]
    fn rejects_malformed_paths() {
        assert!("a[x]".parse::<Keypath>().is_err());
        assert!("a[1".parse::<Keypath>().is_err());
        assert!(".a".parse::<Keypath>().is_err());
        assert!("$".parse::<Keypath>().unwrap().is_root());
    }
}
