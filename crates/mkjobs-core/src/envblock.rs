//! Contiguous environment block
//!
//! Converts a list of `NAME=VALUE` strings into the single double-NUL
//! terminated block process loaders expect:
//!
//! ```text
//! NAME1=VALUE1\0NAME2=VALUE2\0...\0\0
//! ```
//!
//! While copying, the offset of the search-path entry is recorded so image
//! resolution can read it without scanning the block a second time.

cfg_if::cfg_if! {
    if #[cfg(windows)] {
        /// Name of the executable search-path variable
        pub const PATH_VAR: &str = "Path";

        fn is_path_name(name: &str) -> bool {
            name.eq_ignore_ascii_case(PATH_VAR)
        }
    } else {
        /// Name of the executable search-path variable
        pub const PATH_VAR: &str = "PATH";

        fn is_path_name(name: &str) -> bool {
            name == PATH_VAR
        }
    }
}

/// A contiguous, NUL-separated environment block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvBlock {
    /// Entries separated by NUL, terminated by an extra NUL
    block: String,
    /// (start, len) of each entry within `block`
    entries: Vec<(usize, usize)>,
    /// Byte offset of the value of the first PATH entry
    path_value: Option<(usize, usize)>,
}

impl EnvBlock {
    /// Build a block from `NAME=VALUE` strings
    ///
    /// Entries containing NUL cannot be represented and are dropped.
    pub fn from_entries<S: AsRef<str>>(vars: &[S]) -> Self {
        let total: usize = vars.iter().map(|v| v.as_ref().len() + 1).sum();
        let mut block = String::with_capacity(total + 2);
        let mut entries = Vec::with_capacity(vars.len());
        let mut path_value = None;

        for var in vars {
            let var = var.as_ref();
            if var.contains('\0') {
                crate::kwarn!("dropping environment entry with embedded NUL");
                continue;
            }
            let start = block.len();
            block.push_str(var);
            block.push('\0');
            entries.push((start, var.len()));

            if path_value.is_none() {
                if let Some((name, value)) = var.split_once('=') {
                    if is_path_name(name) {
                        path_value = Some((start + name.len() + 1, value.len()));
                    }
                }
            }
        }
        if entries.is_empty() {
            block.push('\0');
        }
        block.push('\0');

        Self { block, entries, path_value }
    }

    /// Snapshot of the current process environment
    pub fn from_process() -> Self {
        let vars: Vec<String> = std::env::vars_os()
            .filter_map(|(k, v)| {
                let (k, v) = (k.into_string().ok()?, v.into_string().ok()?);
                Some(format!("{}={}", k, v))
            })
            .collect();
        Self::from_entries(&vars)
    }

    /// The raw block, double-NUL terminated
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        self.block.as_bytes()
    }

    /// Number of entries
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over `NAME=VALUE` entries in order
    pub fn iter(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries
            .iter()
            .map(move |&(start, len)| &self.block[start..start + len])
    }

    /// Iterate over `(NAME, VALUE)` pairs, skipping entries without `=`
    /// and entries with an empty name
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.iter()
            .filter_map(|e| e.split_once('='))
            .filter(|(name, _)| !name.is_empty())
    }

    /// Value of the search-path variable, via the offset recorded at build time
    #[inline]
    pub fn path(&self) -> Option<&str> {
        self.path_value
            .map(|(start, len)| &self.block[start..start + len])
    }

    /// Byte offset of the search-path value inside the block
    #[inline]
    pub fn path_offset(&self) -> Option<usize> {
        self.path_value.map(|(start, _)| start)
    }

    /// Value of the first entry named `name`
    pub fn get(&self, name: &str) -> Option<&str> {
        self.pairs().find(|(n, _)| *n == name).map(|(_, v)| v)
    }
}
