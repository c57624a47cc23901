/// Ordered list of header fields.
///
/// Names are matched case-insensitively. [`Headers::set`] appends, so a name
/// may appear several times; every value stays retrievable through
/// [`Headers::get_all`] in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    fields: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self { fields: Vec::new() }
    }

    pub fn from_fields(fields: Vec<(String, String)>) -> Self {
        Self { fields }
    }

    /// Appends a field. Existing fields with the same name are kept.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.push((name.into(), value.into()));
    }

    /// First value for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.get_all(name).next()
    }

    /// Every value for `name`, in insertion order.
    pub fn get_all<'a, 'n>(
        &'a self,
        name: &'n str,
    ) -> impl Iterator<Item = &'a str> + use<'a, 'n> {
        self.fields
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Removes every field named `name`, returning how many were dropped.
    pub fn remove(&mut self, name: &str) -> usize {
        let before = self.fields.len();
        self.fields.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        before - self.fields.len()
    }

    /// True when any value of `name` lists `token` (comma separated,
    /// case-insensitive).
    pub fn has_token(&self, name: &str, token: &str) -> bool {
        self.get_all(name)
            .flat_map(|v| v.split(','))
            .any(|t| t.trim().eq_ignore_ascii_case(token))
    }

    pub fn extend<I>(&mut self, fields: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.fields.extend(fields);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub(crate) fn write_to(&self, buf: &mut Vec<u8>) {
        for (k, v) in &self.fields {
            buf.extend_from_slice(k.as_bytes());
            buf.extend_from_slice(b": ");
            buf.extend_from_slice(v.as_bytes());
            buf.extend_from_slice(b"\r\n");
        }
    }
}

impl<'a> IntoIterator for &'a Headers {
    type Item = (&'a str, &'a str);
    type IntoIter = Box<dyn Iterator<Item = (&'a str, &'a str)> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicates_keep_insertion_order() {
        let mut headers = Headers::new();
        headers.set("Set-Cookie", "a=1");
        headers.set("X-Other", "x");
        headers.set("set-cookie", "b=2");

        let all: Vec<_> = headers.get_all("SET-COOKIE").collect();
        assert_eq!(all, vec!["a=1", "b=2"]);
        assert_eq!(headers.get("Set-Cookie"), Some("a=1"));

        let names: Vec<_> = headers.iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["Set-Cookie", "X-Other", "set-cookie"]);
    }

    #[test]
    fn values_outlive_the_lookup_name() {
        let mut headers = Headers::new();
        headers.set("X-Tag", "a");
        headers.set("X-Tag", "b");

        let (first, all) = {
            let name = String::from("x-tag");
            let all: Vec<&str> = headers.get_all(&name).collect();
            (headers.get(&name), all)
        };
        assert_eq!(first, Some("a"));
        assert_eq!(all, vec!["a", "b"]);
    }

    #[test]
    fn tokens_are_case_insensitive() {
        let mut headers = Headers::new();
        headers.set("Connection", "Keep-Alive, Upgrade");
        assert!(headers.has_token("connection", "keep-alive"));
        assert!(headers.has_token("connection", "upgrade"));
        assert!(!headers.has_token("connection", "close"));
    }

    #[test]
    fn remove_drops_every_value() {
        let mut headers = Headers::new();
        headers.set("A", "1");
        headers.set("a", "2");
        headers.set("B", "3");
        assert_eq!(headers.remove("A"), 2);
        assert_eq!(headers.len(), 1);
    }
}
