use std::fmt;

use url::form_urlencoded;

/// A flat `name -> list of values` map decoded from a query string or
/// an urlencoded body
///
/// Pairs keep their order of appearance; lookups scan linearly, which
/// is the right trade-off for the handful of fields a request carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormData {
    pairs: Vec<(String, String)>,
}

impl FormData {
    /// Decode percent-encoding and `&`/`=` splitting from raw bytes
    pub fn parse(data: &[u8]) -> FormData {
        FormData {
            pairs: form_urlencoded::parse(data)
                .map(|(name, value)| (name.into_owned(), value.into_owned()))
                .collect(),
        }
    }
    /// An empty map
    pub fn empty() -> FormData {
        FormData { pairs: Vec::new() }
    }
    /// First value for the name, if any
    pub fn get(&self, name: &str) -> Option<&str> {
        self.pairs.iter()
            .find(|&&(ref n, _)| n == name)
            .map(|&(_, ref v)| &v[..])
    }
    /// All values for the name, in order of appearance
    pub fn get_all<'x>(&'x self, name: &'x str)
        -> impl Iterator<Item=&'x str> + 'x
    {
        self.pairs.iter()
            .filter(move |&&(ref n, _)| n == name)
            .map(|&(_, ref v)| &v[..])
    }
    /// All pairs in order of appearance
    pub fn iter<'x>(&'x self) -> impl Iterator<Item=(&'x str, &'x str)> + 'x
    {
        self.pairs.iter().map(|&(ref n, ref v)| (&n[..], &v[..]))
    }
    /// Number of pairs
    pub fn len(&self) -> usize {
        self.pairs.len()
    }
    /// True if there are no pairs
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

impl fmt::Display for FormData {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut ser = form_urlencoded::Serializer::new(String::new());
        for &(ref n, ref v) in &self.pairs {
            ser.append_pair(n, v);
        }
        f.write_str(&ser.finish())
    }
}

#[cfg(test)]
mod test {
    use super::FormData;

    #[test]
    fn basic_pairs() {
        let form = FormData::parse(b"name=world&lang=en");
        assert_eq!(form.get("name"), Some("world"));
        assert_eq!(form.get("lang"), Some("en"));
        assert_eq!(form.get("missing"), None);
        assert_eq!(form.len(), 2);
    }

    #[test]
    fn percent_decoding() {
        let form = FormData::parse(b"q=hello%20world&x=a%2Bb");
        assert_eq!(form.get("q"), Some("hello world"));
        assert_eq!(form.get("x"), Some("a+b"));
    }

    #[test]
    fn plus_is_space() {
        let form = FormData::parse(b"q=hello+world");
        assert_eq!(form.get("q"), Some("hello world"));
    }

    #[test]
    fn repeated_names_keep_order() {
        let form = FormData::parse(b"tag=a&tag=b&tag=c");
        let all: Vec<_> = form.get_all("tag").collect();
        assert_eq!(all, vec!["a", "b", "c"]);
        // `get` returns the first one
        assert_eq!(form.get("tag"), Some("a"));
    }

    #[test]
    fn empty_input() {
        let form = FormData::parse(b"");
        assert!(form.is_empty());
    }
}
