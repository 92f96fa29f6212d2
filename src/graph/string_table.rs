//! A per-graph table owning all string constants; constant string nodes
//! reference it by offset (`spec.md` §3.3). Offsets are dense indices, not
//! byte offsets -- the name follows the spec's terminology, but there is no
//! packed byte buffer until serialization time.

#[derive(Clone, Debug, Default, PartialEq)]
pub struct StringTable {
    strings: Vec<String>,
}

impl StringTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a string, returning its offset. Does not deduplicate -- two
    /// constant nodes with the same string value get distinct offsets until
    /// the optimizer's constant-dedup phase collapses the nodes themselves
    /// (`spec.md` §4.4, dedup phase (a)).
    pub fn insert(&mut self, value: &str) -> u32 {
        self.strings.push(value.to_string());
        (self.strings.len() - 1) as u32
    }

    pub fn get(&self, offset: u32) -> &str {
        self.strings
            .get(offset as usize)
            .map(String::as_str)
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.strings.iter().map(String::as_str)
    }

    /// Rebuild the table so it contains only the strings referenced by
    /// `used_offsets`, in the same relative order, returning a map from old
    /// offset to new offset. Called by [super::NativeModuleGraph::compact]
    /// to sweep dead string entries.
    pub fn retain_offsets(&mut self, mut used_offsets: Vec<u32>) -> Vec<Option<u32>> {
        used_offsets.sort_unstable();
        used_offsets.dedup();

        let mut remap = vec![None; self.strings.len()];
        let mut new_strings = Vec::with_capacity(used_offsets.len());
        for old_offset in used_offsets {
            if let Some(s) = self.strings.get(old_offset as usize) {
                remap[old_offset as usize] = Some(new_strings.len() as u32);
                new_strings.push(s.clone());
            }
        }
        self.strings = new_strings;
        remap
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_get() {
        let mut table = StringTable::new();
        let a = table.insert("hello");
        let b = table.insert("world");
        assert_eq!(table.get(a), "hello");
        assert_eq!(table.get(b), "world");
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn retain_offsets_sweeps_and_remaps() {
        let mut table = StringTable::new();
        let a = table.insert("keep-me");
        let _dead = table.insert("sweep-me");
        let c = table.insert("also-keep");

        let remap = table.retain_offsets(vec![a, c]);
        assert_eq!(table.len(), 2);
        assert_eq!(remap[a as usize], Some(0));
        assert_eq!(remap[c as usize], Some(1));
        assert_eq!(table.get(0), "keep-me");
        assert_eq!(table.get(1), "also-keep");
    }
}
