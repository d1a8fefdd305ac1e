use ditlock::PathKey;

/// a slash-separated test key: `Dn::of("/a/b/c")` is a child of `Dn::of("/a/b")`
#[derive(Eq, PartialEq, Hash, Clone, Debug)]
pub struct Dn(Vec<String>);

impl Dn {
    pub fn of(path: &str) -> Self {
        Dn(path
            .split('/')
            .filter(|seg| !seg.is_empty())
            .map(String::from)
            .collect())
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }
}

impl PathKey for Dn {
    fn parent(&self) -> Option<Dn> {
        match self.0.len() {
            0 | 1 => None,
            n => Some(Dn(self.0[..n - 1].to_vec())),
        }
    }
}
