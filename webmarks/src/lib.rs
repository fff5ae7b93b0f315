//! Bookmark-collection domain library: parse an RDF-style bookmark file into
//! a normalized tree, project it into a sorted two-zone menu and a flat
//! search index, and keep both in sync with the file on disk.

pub mod core {
    use indexmap::IndexMap;
    use serde::{Deserialize, Serialize};
    use uuid::Uuid;

    /// Reserved subject marking toolbar placement; it never forms a group,
    /// and an item carrying only this subject counts as ungrouped.
    pub const TOOLBAR_SUBJECT: &str = "Bookmarks Toolbar";

    /* ------------------------------- IDs ------------------------------- */

    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct NodeId(pub Uuid);

    impl NodeId {
        pub fn new() -> Self {
            Self(Uuid::new_v4())
        }
    }

    impl Default for NodeId {
        fn default() -> Self {
            Self::new()
        }
    }

    /* ------------------------------ Aggregate ------------------------------ */

    /// A single bookmark entry. Immutable once parsed.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct BookmarkItem {
        pub title: String,
        pub url: String,
    }

    /// Aggregate root: one parse of a bookmark file.
    ///
    /// `groups` maps each qualifying subject to its items, keyed in the order
    /// subjects were first seen; `contents` holds the items with no
    /// qualifying subject. Rebuilt wholesale on every parse, never patched.
    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
    pub struct BookmarkCollection {
        #[serde(default)]
        pub groups: IndexMap<String, Vec<BookmarkItem>>,
        #[serde(default)]
        pub contents: Vec<BookmarkItem>,
    }

    impl BookmarkCollection {
        pub fn is_empty(&self) -> bool {
            self.groups.is_empty() && self.contents.is_empty()
        }

        /// Grouped occurrences plus ungrouped items. An item listed under
        /// several subjects counts once per group.
        pub fn total_items(&self) -> usize {
            self.groups.values().map(Vec::len).sum::<usize>() + self.contents.len()
        }
    }

    /* ------------------------------- Mode ------------------------------- */

    bitflags::bitflags! {
        /// Which projections a store maintains.
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct Mode: u8 {
            const MENU = 1;
            const SEARCH = 2;
            const OVERVIEW = 4;
        }
    }

    impl Default for Mode {
        fn default() -> Self {
            Mode::MENU | Mode::SEARCH
        }
    }
}

pub mod insert {
    //! Ordered insertion into a two-zone collection: group entries first,
    //! leaf entries second, each zone sorted case-insensitively by label.
    //! Entries arrive one at a time and both zone invariants hold after
    //! every single insertion; nothing relies on a batch sort at the end.

    /// Capability shared by anything that can be ranked into a zone: a
    /// display label and whether the entry opens a sub-collection.
    pub trait Ranked {
        fn label(&self) -> &str;
        fn is_group(&self) -> bool;
    }

    /// A rank-ordered collection partitioned into a group zone followed by a
    /// leaf zone. The running size of each zone restricts every insertion's
    /// binary search to the entry's own zone.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct RankedList<T: Ranked> {
        items: Vec<T>,
        groups: usize,
        leaves: usize,
    }

    impl<T: Ranked> Default for RankedList<T> {
        fn default() -> Self {
            Self::new()
        }
    }

    impl<T: Ranked> RankedList<T> {
        pub fn new() -> Self {
            Self {
                items: Vec::new(),
                groups: 0,
                leaves: 0,
            }
        }

        pub fn len(&self) -> usize {
            self.items.len()
        }

        pub fn is_empty(&self) -> bool {
            self.items.is_empty()
        }

        /// Size of the group zone, which spans indices `0..groups()`.
        pub fn groups(&self) -> usize {
            self.groups
        }

        /// Size of the leaf zone, which spans indices `groups()..len()`.
        pub fn leaves(&self) -> usize {
            self.leaves
        }

        pub fn get(&self, index: usize) -> Option<&T> {
            self.items.get(index)
        }

        pub fn iter(&self) -> std::slice::Iter<'_, T> {
            self.items.iter()
        }

        pub fn clear(&mut self) {
            self.items.clear();
            self.groups = 0;
            self.leaves = 0;
        }

        /// Place `entry` at its rank within its own zone.
        ///
        /// Equal labels insert after existing equals, so `n` insertions
        /// leave the collection exactly as if all `n` entries had been
        /// stably sorted by (zone, lowercased label) and concatenated.
        pub fn insert(&mut self, entry: T) {
            let is_group = entry.is_group();

            if self.items.is_empty() {
                self.place(0, entry, is_group);
                return;
            }

            // Only the entry's own zone takes part in the search.
            let (start, end) = if is_group {
                if self.groups == 0 {
                    self.place(0, entry, true);
                    return;
                }
                (0, self.groups - 1)
            } else {
                if self.leaves == 0 {
                    self.place(self.groups, entry, false);
                    return;
                }
                (self.groups, self.groups + self.leaves - 1)
            };

            let key = entry.label().to_lowercase();

            if key < self.key_at(start) {
                self.place(start, entry, is_group);
                return;
            }
            if key >= self.key_at(end) {
                self.place(end + 1, entry, is_group);
                return;
            }

            // Invariant: key_at(lo) <= key < key_at(hi).
            let (mut lo, mut hi) = (start, end);
            while lo < hi && hi - lo > 1 {
                let mid = (lo + hi) / 2;
                if key < self.key_at(mid) {
                    hi = mid;
                } else {
                    lo = mid;
                }
            }

            let mut at = lo;
            if key >= self.key_at(at) {
                at += 1;
            }
            self.place(at, entry, is_group);
        }

        fn key_at(&self, index: usize) -> String {
            self.items[index].label().to_lowercase()
        }

        fn place(&mut self, at: usize, entry: T, is_group: bool) {
            self.items.insert(at, entry);
            if is_group {
                self.groups += 1;
            } else {
                self.leaves += 1;
            }
        }
    }

    impl<'a, T: Ranked> IntoIterator for &'a RankedList<T> {
        type Item = &'a T;
        type IntoIter = std::slice::Iter<'a, T>;

        fn into_iter(self) -> Self::IntoIter {
            self.iter()
        }
    }

    #[cfg(test)]
    mod tests {
        use super::{Ranked, RankedList};
        use rand::{Rng, SeedableRng, rngs::StdRng};

        #[derive(Debug, Clone, PartialEq, Eq)]
        struct Probe {
            label: String,
            group: bool,
        }

        impl Probe {
            fn group(label: &str) -> Self {
                Self {
                    label: label.to_string(),
                    group: true,
                }
            }

            fn leaf(label: &str) -> Self {
                Self {
                    label: label.to_string(),
                    group: false,
                }
            }
        }

        impl Ranked for Probe {
            fn label(&self) -> &str {
                &self.label
            }

            fn is_group(&self) -> bool {
                self.group
            }
        }

        fn labels(list: &RankedList<Probe>) -> Vec<(bool, String)> {
            list.iter().map(|p| (p.group, p.label.clone())).collect()
        }

        #[test]
        fn groups_precede_leaves() {
            let mut list = RankedList::new();
            list.insert(Probe::leaf("mail"));
            list.insert(Probe::group("news"));
            list.insert(Probe::leaf("archive"));
            list.insert(Probe::group("blogs"));

            assert_eq!(list.groups(), 2);
            assert_eq!(list.leaves(), 2);
            assert_eq!(
                labels(&list),
                vec![
                    (true, "blogs".to_string()),
                    (true, "news".to_string()),
                    (false, "archive".to_string()),
                    (false, "mail".to_string()),
                ]
            );
        }

        #[test]
        fn sorting_ignores_case() {
            let mut list = RankedList::new();
            for label in ["Zebra", "apple", "Mango", "banana"] {
                list.insert(Probe::leaf(label));
            }
            let got: Vec<String> = list.iter().map(|p| p.label.clone()).collect();
            assert_eq!(got, vec!["apple", "banana", "Mango", "Zebra"]);
        }

        #[test]
        fn equal_labels_stay_in_insertion_order() {
            let mut list = RankedList::new();
            list.insert(Probe::leaf("Beta"));
            list.insert(Probe::leaf("alpha"));
            list.insert(Probe::leaf("beta"));
            list.insert(Probe::leaf("BETA"));

            let got: Vec<String> = list.iter().map(|p| p.label.clone()).collect();
            assert_eq!(got, vec!["alpha", "Beta", "beta", "BETA"]);
        }

        #[test]
        fn randomized_insertions_match_a_stable_sort() {
            // Small alphabet and short labels so duplicate keys show up often.
            let mut rng = StdRng::seed_from_u64(0xb00c_ca5e);
            let alphabet = ['a', 'B', 'c', 'A', 'b', 'C'];

            for _ in 0..64 {
                let n = rng.gen_range(0..=50);
                let mut list = RankedList::new();
                let mut inserted: Vec<(bool, String)> = Vec::new();

                for _ in 0..n {
                    let group = rng.gen_bool(0.4);
                    let len = rng.gen_range(1..=3);
                    let label: String = (0..len)
                        .map(|_| alphabet[rng.gen_range(0..alphabet.len())])
                        .collect();
                    list.insert(Probe {
                        label: label.clone(),
                        group,
                    });
                    inserted.push((group, label));
                }

                let mut expected = inserted.clone();
                expected.sort_by(|a, b| {
                    (!a.0)
                        .cmp(&!b.0)
                        .then_with(|| a.1.to_lowercase().cmp(&b.1.to_lowercase()))
                });

                assert_eq!(labels(&list), expected);
                assert_eq!(list.groups() + list.leaves(), list.len());
                assert_eq!(list.groups(), expected.iter().filter(|(g, _)| *g).count());
            }
        }

        #[test]
        fn clear_resets_both_zones() {
            let mut list = RankedList::new();
            list.insert(Probe::group("g"));
            list.insert(Probe::leaf("l"));
            list.clear();
            assert!(list.is_empty());
            assert_eq!(list.groups(), 0);
            assert_eq!(list.leaves(), 0);
        }
    }
}

pub mod parser {
    //! Bookmark-file parser built on `nom`.
    //!
    //! The file is an XML document whose root holds namespace-qualified
    //! `item` elements with `title`, `link` and repeated `subject` children.
    //! Parsing is strict at the document level (a structural failure rejects
    //! the whole file) and tolerant per item: missing fields resolve to
    //! empty strings and unknown elements are skipped.

    use crate::core::{BookmarkCollection, BookmarkItem, TOOLBAR_SUBJECT};
    use nom::{
        IResult,
        branch::alt,
        bytes::complete::{tag, take_till1, take_until, take_while, take_while1},
        character::complete::{char, multispace0, multispace1},
        error::{VerboseError, VerboseErrorKind},
        sequence::delimited,
    };
    use std::{fs, path::Path, path::PathBuf};

    /* --------------------------- Failure modes --------------------------- */

    #[derive(Debug, thiserror::Error)]
    pub enum ParseError {
        #[error("not a regular file: {0:?}")]
        NotAFile(PathBuf),
        #[error("reading {path:?}: {source}")]
        ReadFailure {
            path: PathBuf,
            #[source]
            source: std::io::Error,
        },
        #[error("invalid markup in {0:?}")]
        InvalidMarkup(PathBuf),
    }

    /* ------------------------ Public entry points ------------------------ */

    /// Parse the bookmark file at `path` into a normalized collection.
    pub fn parse_file(path: &Path) -> Result<BookmarkCollection, ParseError> {
        let regular = fs::metadata(path).map(|m| m.is_file()).unwrap_or(false);
        if !regular {
            return Err(ParseError::NotAFile(path.to_path_buf()));
        }

        let bytes = fs::read(path).map_err(|source| ParseError::ReadFailure {
            path: path.to_path_buf(),
            source,
        })?;

        let Ok(raw) = String::from_utf8(bytes) else {
            return Err(ParseError::InvalidMarkup(path.to_path_buf()));
        };

        parse_str(&raw).ok_or_else(|| ParseError::InvalidMarkup(path.to_path_buf()))
    }

    /// Parse bookmark markup already in memory. `None` means the document
    /// is structurally invalid after prolog stripping.
    pub fn parse_str(raw: &str) -> Option<BookmarkCollection> {
        let body = strip_prolog(raw);
        let root = parse_document(body)?;
        Some(collection_from_root(&root))
    }

    type PResult<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

    /* ----------------------------- Markup tree ---------------------------- */

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct MarkupElement {
        name: String,
        children: Vec<MarkupNode>,
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum MarkupNode {
        Element(MarkupElement),
        Text(String),
    }

    impl MarkupElement {
        /// Element name with any namespace prefix removed. The prefix itself
        /// is accepted but never validated.
        fn local_name(&self) -> &str {
            self.name.rsplit(':').next().unwrap_or(&self.name)
        }

        fn elements(&self) -> impl Iterator<Item = &MarkupElement> {
            self.children.iter().filter_map(|node| match node {
                MarkupNode::Element(el) => Some(el),
                MarkupNode::Text(_) => None,
            })
        }

        fn children_named<'a>(
            &'a self,
            local: &'a str,
        ) -> impl Iterator<Item = &'a MarkupElement> {
            self.elements().filter(move |el| el.local_name() == local)
        }

        /// Concatenated text content of this element, trimmed.
        fn text(&self) -> String {
            let mut out = String::new();
            for node in &self.children {
                if let MarkupNode::Text(text) = node {
                    out.push_str(text);
                }
            }
            out.trim().to_string()
        }

        /// Text of the first child named `local`; absent resolves to "".
        fn child_text(&self, local: &str) -> String {
            self.children_named(local)
                .next()
                .map(|el| el.text())
                .unwrap_or_default()
        }
    }

    /* ----------------------------- Extraction ----------------------------- */

    fn collection_from_root(root: &MarkupElement) -> BookmarkCollection {
        let mut out = BookmarkCollection::default();

        for element in root.children_named("item") {
            let title = element.child_text("title");
            let url = element.child_text("link");

            let mut grouped = false;
            for subject in element.children_named("subject") {
                let subject = subject.text();
                if subject == TOOLBAR_SUBJECT {
                    continue;
                }
                grouped = true;
                out.groups.entry(subject).or_default().push(BookmarkItem {
                    title: title.clone(),
                    url: url.clone(),
                });
            }

            if !grouped {
                out.contents.push(BookmarkItem { title, url });
            }
        }

        out
    }

    /* ------------------------------- Prolog ------------------------------- */

    /// Strip a leading `<?xml version="..." ...?>` declaration if present.
    /// A missing prolog is fine; a malformed one is left in place and the
    /// document parse rejects it.
    fn strip_prolog(input: &str) -> &str {
        match xml_prolog(input) {
            Ok((rest, ())) => rest,
            Err(_) => input,
        }
    }

    fn xml_prolog(i: &str) -> PResult<'_, ()> {
        let (i, _) = tag("<?xml")(i)?;
        let (i, _) = multispace1(i)?;
        let (i, _) = tag("version")(i)?;
        let (i, _) = multispace0(i)?;
        let (i, _) = char('=')(i)?;
        let (i, _) = multispace0(i)?;
        let (i, _) = quoted_value1(i)?;
        let (i, _) = take_while(|c| c != '?')(i)?;
        let (i, _) = tag("?>")(i)?;
        Ok((i, ()))
    }

    /* ----------------------------- Combinators ---------------------------- */

    fn is_name_char(c: char) -> bool {
        c.is_alphanumeric() || matches!(c, ':' | '_' | '-' | '.')
    }

    fn element_name(i: &str) -> PResult<'_, &str> {
        take_while1(is_name_char)(i)
    }

    fn quoted_value(i: &str) -> PResult<'_, &str> {
        alt((
            delimited(char('"'), take_while(|c| c != '"'), char('"')),
            delimited(char('\''), take_while(|c| c != '\''), char('\'')),
        ))(i)
    }

    fn quoted_value1(i: &str) -> PResult<'_, &str> {
        alt((
            delimited(char('"'), take_till1(|c| c == '"'), char('"')),
            delimited(char('\''), take_till1(|c| c == '\''), char('\'')),
        ))(i)
    }

    fn comment(i: &str) -> PResult<'_, ()> {
        let (i, _) = tag("<!--")(i)?;
        let (i, _) = take_until("-->")(i)?;
        let (i, _) = tag("-->")(i)?;
        Ok((i, ()))
    }

    /// Whitespace and comments between markup constructs.
    fn junk0(mut i: &str) -> PResult<'_, ()> {
        loop {
            let (rest, _) = multispace0::<_, VerboseError<&str>>(i)?;
            i = rest;
            match comment(i) {
                Ok((rest, ())) => i = rest,
                Err(_) => break,
            }
        }
        Ok((i, ()))
    }

    /// Attributes are consumed so namespace declarations and the like parse,
    /// but their values take no part in the data model.
    fn attributes(mut i: &str) -> PResult<'_, ()> {
        loop {
            let checkpoint = i;
            let Ok((rest, _)) = multispace1::<_, VerboseError<&str>>(i) else {
                break;
            };
            match attribute(rest) {
                Ok((rest, ())) => i = rest,
                Err(_) => {
                    i = checkpoint;
                    break;
                }
            }
        }
        Ok((i, ()))
    }

    fn attribute(i: &str) -> PResult<'_, ()> {
        let (i, _) = element_name(i)?;
        let (i, _) = multispace0(i)?;
        let (i, _) = char('=')(i)?;
        let (i, _) = multispace0(i)?;
        let (i, _) = quoted_value(i)?;
        Ok((i, ()))
    }

    fn element(i: &str) -> PResult<'_, MarkupElement> {
        let (i, _) = char('<')(i)?;
        let (i, name) = element_name(i)?;
        let (i, _) = attributes(i)?;
        let (i, _) = multispace0(i)?;

        if let Ok((i, _)) = tag::<_, _, VerboseError<&str>>("/>")(i) {
            return Ok((
                i,
                MarkupElement {
                    name: name.to_string(),
                    children: Vec::new(),
                },
            ));
        }

        let (i, _) = char('>')(i)?;
        let (i, children) = node_list(i)?;
        let (i, _) = tag("</")(i)?;
        let (i, close) = element_name(i)?;
        if close != name {
            return Err(nom::Err::Error(VerboseError {
                errors: vec![(i, VerboseErrorKind::Context("mismatched-close-tag"))],
            }));
        }
        let (i, _) = multispace0(i)?;
        let (i, _) = char('>')(i)?;

        Ok((
            i,
            MarkupElement {
                name: name.to_string(),
                children,
            },
        ))
    }

    fn node_list(mut i: &str) -> PResult<'_, Vec<MarkupNode>> {
        let mut out = Vec::new();
        loop {
            if i.is_empty() || i.starts_with("</") {
                break;
            }
            if let Ok((rest, ())) = comment(i) {
                i = rest;
                continue;
            }
            if i.starts_with('<') {
                let (rest, el) = element(i)?;
                out.push(MarkupNode::Element(el));
                i = rest;
                continue;
            }
            let (rest, text) = text_node(i)?;
            out.push(MarkupNode::Text(text));
            i = rest;
        }
        Ok((i, out))
    }

    fn text_node(i: &str) -> PResult<'_, String> {
        let (i, raw) = take_while1(|c| c != '<')(i)?;
        Ok((i, decode_entities(raw)))
    }

    fn parse_document(input: &str) -> Option<MarkupElement> {
        let (i, ()) = junk0(input).ok()?;
        let (i, root) = element(i).ok()?;
        let (i, ()) = junk0(i).ok()?;
        i.is_empty().then_some(root)
    }

    /// Decode the five predefined XML entities; anything else stays raw.
    fn decode_entities(raw: &str) -> String {
        const ENTITIES: [(&str, char); 5] = [
            ("&amp;", '&'),
            ("&lt;", '<'),
            ("&gt;", '>'),
            ("&quot;", '"'),
            ("&apos;", '\''),
        ];

        let mut out = String::with_capacity(raw.len());
        let mut rest = raw;
        while let Some(idx) = rest.find('&') {
            out.push_str(&rest[..idx]);
            rest = &rest[idx..];
            let mut replaced = false;
            for (entity, ch) in ENTITIES {
                if let Some(tail) = rest.strip_prefix(entity) {
                    out.push(ch);
                    rest = tail;
                    replaced = true;
                    break;
                }
            }
            if !replaced {
                out.push('&');
                rest = &rest[1..];
            }
        }
        out.push_str(rest);
        out
    }

}

pub mod menu {
    //! In-memory presentation tree: a root two-zone list of group and leaf
    //! nodes, group children themselves two-zone lists. A desktop host would
    //! back the same operations with real menu widgets.

    use crate::core::{BookmarkCollection, NodeId};
    use crate::insert::{Ranked, RankedList};

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct MenuNode {
        pub id: NodeId,
        pub label: String,
        pub kind: MenuNodeKind,
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum MenuNodeKind {
        Group { children: RankedList<MenuNode> },
        Leaf { url: String },
    }

    impl MenuNode {
        pub fn group(label: &str) -> Self {
            Self {
                id: NodeId::new(),
                label: label.to_string(),
                kind: MenuNodeKind::Group {
                    children: RankedList::new(),
                },
            }
        }

        pub fn leaf(label: &str, url: &str) -> Self {
            Self {
                id: NodeId::new(),
                label: label.to_string(),
                kind: MenuNodeKind::Leaf {
                    url: url.to_string(),
                },
            }
        }

        /// Rank `child` into this node's sub-collection. Leaves have none.
        pub fn insert_child(&mut self, child: MenuNode) {
            match &mut self.kind {
                MenuNodeKind::Group { children } => children.insert(child),
                MenuNodeKind::Leaf { .. } => {
                    debug_assert!(false, "leaf nodes have no children");
                }
            }
        }

        pub fn children(&self) -> Option<&RankedList<MenuNode>> {
            match &self.kind {
                MenuNodeKind::Group { children } => Some(children),
                MenuNodeKind::Leaf { .. } => None,
            }
        }
    }

    impl Ranked for MenuNode {
        fn label(&self) -> &str {
            &self.label
        }

        fn is_group(&self) -> bool {
            matches!(self.kind, MenuNodeKind::Group { .. })
        }
    }

    /// The browsable projection owned by a store: group nodes first, then
    /// ungrouped leaves, each zone sorted case-insensitively.
    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct MenuTree {
        root: RankedList<MenuNode>,
    }

    impl MenuTree {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn from_collection(collection: &BookmarkCollection) -> Self {
            let mut tree = Self::new();
            tree.rebuild_from(collection);
            tree
        }

        pub fn root(&self) -> &RankedList<MenuNode> {
            &self.root
        }

        pub fn insert(&mut self, node: MenuNode) {
            self.root.insert(node);
        }

        /// Tear down every node. The container itself survives rebuilds.
        pub fn remove_all(&mut self) {
            self.root.clear();
        }

        /// Re-project `collection`: one group node per group in first-seen
        /// order, its items ranked as leaves, then the ungrouped leaves.
        pub fn rebuild_from(&mut self, collection: &BookmarkCollection) {
            self.remove_all();
            for (subject, items) in &collection.groups {
                let mut group = MenuNode::group(subject);
                for item in items {
                    group.insert_child(MenuNode::leaf(&item.title, &item.url));
                }
                self.insert(group);
            }
            for item in &collection.contents {
                self.insert(MenuNode::leaf(&item.title, &item.url));
            }
        }

        /// Indented text listing, used by the CLI and by content-equality
        /// checks in tests.
        pub fn render(&self) -> String {
            let mut out = String::new();
            for node in self.root.iter() {
                render_node(&mut out, node, 0);
            }
            out
        }
    }

    fn render_node(out: &mut String, node: &MenuNode, depth: usize) {
        for _ in 0..depth {
            out.push_str("  ");
        }
        match &node.kind {
            MenuNodeKind::Group { children } => {
                out.push_str(&node.label);
                out.push('\n');
                for child in children.iter() {
                    render_node(out, child, depth + 1);
                }
            }
            MenuNodeKind::Leaf { url } => {
                out.push_str(&node.label);
                if !url.is_empty() {
                    out.push_str("  <");
                    out.push_str(url);
                    out.push('>');
                }
                out.push('\n');
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::MenuTree;
        use crate::parser::parse_str;

        #[test]
        fn projection_ranks_groups_before_leaves() {
            let collection = parse_str(
                "<root>\
                 <item><title>zeta</title><link>http://z/</link></item>\
                 <item><title>beta</title><link>http://b/</link>\
                 <subject>Work</subject></item>\
                 <item><title>alpha</title><link>http://a/</link>\
                 <subject>Archive</subject></item>\
                 </root>",
            )
            .expect("parses");

            let tree = MenuTree::from_collection(&collection);
            assert_eq!(tree.root().groups(), 2);
            assert_eq!(tree.root().leaves(), 1);

            let labels: Vec<&str> = tree.root().iter().map(|n| n.label.as_str()).collect();
            assert_eq!(labels, vec!["Archive", "Work", "zeta"]);
        }

        #[test]
        fn render_lists_children_indented() {
            let collection = parse_str(
                "<root><item><title>beta</title><link>http://b/</link>\
                 <subject>Work</subject></item></root>",
            )
            .expect("parses");
            let tree = MenuTree::from_collection(&collection);
            assert_eq!(tree.render(), "Work\n  beta  <http://b/>\n");
        }
    }
}

pub mod search {
    //! Flat search projection over the whole collection and the match
    //! predicate the host queries it with.

    use crate::core::BookmarkCollection;
    use regex::RegexBuilder;
    use serde::{Deserialize, Serialize};

    /// One searchable bookmark. `position` is the entry's index in the
    /// flattened set and is only stable within one build generation.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct SearchEntry {
        pub position: usize,
        pub name: String,
        pub url: String,
    }

    /// The search projection of one parse: grouped items in first-seen group
    /// order, then ungrouped items. Replaced wholesale on every rebuild.
    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct SearchIndex {
        entries: Vec<SearchEntry>,
    }

    impl SearchIndex {
        pub fn from_collection(collection: &BookmarkCollection) -> Self {
            let mut entries = Vec::with_capacity(collection.total_items());
            for items in collection.groups.values() {
                for item in items {
                    push_entry(&mut entries, &item.title, &item.url);
                }
            }
            for item in &collection.contents {
                push_entry(&mut entries, &item.title, &item.url);
            }
            Self { entries }
        }

        pub fn len(&self) -> usize {
            self.entries.len()
        }

        pub fn is_empty(&self) -> bool {
            self.entries.is_empty()
        }

        pub fn entries(&self) -> &[SearchEntry] {
            &self.entries
        }

        /// Result-metadata lookup by flattening position.
        pub fn entry(&self, position: usize) -> Option<&SearchEntry> {
            self.entries.get(position)
        }

        /// Build the match set for `terms`.
        ///
        /// All non-empty terms are concatenated with no separator into one
        /// case-insensitive pattern, so adjacent terms only match where they
        /// appear contiguously in the haystack. Each entry's haystack is its
        /// name and URL joined with all whitespace removed. Entries come
        /// back in flattening order, not ranked.
        pub fn matches(&self, terms: &[String]) -> Vec<&SearchEntry> {
            let mut pattern = String::new();
            for term in terms {
                if !term.is_empty() {
                    pattern.push_str(term);
                }
            }

            let test = match RegexBuilder::new(&pattern).case_insensitive(true).build() {
                Ok(re) => re,
                Err(err) => {
                    log::warn!("search pattern {pattern:?} rejected: {err}");
                    return Vec::new();
                }
            };

            self.entries
                .iter()
                .filter(|entry| test.is_match(&haystack(entry)))
                .collect()
        }

        /// A refined query runs fresh over the full entry set; it is not a
        /// narrowing of a previous match set.
        pub fn subsearch(&self, terms: &[String]) -> Vec<&SearchEntry> {
            self.matches(terms)
        }
    }

    fn push_entry(entries: &mut Vec<SearchEntry>, name: &str, url: &str) {
        entries.push(SearchEntry {
            position: entries.len(),
            name: name.to_string(),
            url: url.to_string(),
        });
    }

    fn haystack(entry: &SearchEntry) -> String {
        entry
            .name
            .chars()
            .chain(entry.url.chars())
            .filter(|c| !c.is_whitespace())
            .collect()
    }

    #[cfg(test)]
    mod tests {
        use super::SearchIndex;
        use crate::parser::parse_str;

        fn index(doc: &str) -> SearchIndex {
            SearchIndex::from_collection(&parse_str(doc).expect("parses"))
        }

        fn terms(words: &[&str]) -> Vec<String> {
            words.iter().map(|w| w.to_string()).collect()
        }

        #[test]
        fn positions_follow_flattening_order() {
            let idx = index(
                "<root>\
                 <item><title>solo</title><link>http://s/</link></item>\
                 <item><title>grouped</title><link>http://g/</link>\
                 <subject>A</subject></item>\
                 </root>",
            );
            // Grouped entries flatten first, then ungrouped.
            assert_eq!(idx.len(), 2);
            assert_eq!(idx.entry(0).expect("entry").name, "grouped");
            assert_eq!(idx.entry(1).expect("entry").name, "solo");
            assert!(idx.entry(2).is_none());
        }

        #[test]
        fn single_term_matches_title_case_insensitively() {
            let idx = index(
                "<root>\
                 <item><title>Linux News</title><link>http://a</link></item>\
                 <item><title>Cooking</title><link>http://b</link></item>\
                 </root>",
            );
            let hits = idx.matches(&terms(&["linux"]));
            assert_eq!(hits.len(), 1);
            assert_eq!(hits[0].name, "Linux News");
        }

        #[test]
        fn terms_concatenate_without_separator() {
            let idx = index(
                "<root>\
                 <item><title>xy together</title><link>http://1</link></item>\
                 <item><title>x apart y</title><link>http://2</link></item>\
                 </root>",
            );
            let hits = idx.matches(&terms(&["x", "y"]));
            assert_eq!(hits.len(), 1);
            assert_eq!(hits[0].name, "xy together");
        }

        #[test]
        fn haystack_spans_title_and_url_with_whitespace_removed() {
            let idx = index(
                "<root><item><title>Daily News</title>\
                 <link>http://planet.example/feed</link></item></root>",
            );
            // "News" and "http" only become adjacent once whitespace goes.
            assert_eq!(idx.matches(&terms(&["Newshttp"])).len(), 1);
            assert_eq!(idx.matches(&terms(&["planet"])).len(), 1);
        }

        #[test]
        fn empty_terms_are_dropped_and_match_everything() {
            let idx = index(
                "<root>\
                 <item><title>a</title><link>http://a</link></item>\
                 <item><title>b</title><link>http://b</link></item>\
                 </root>",
            );
            assert_eq!(idx.matches(&terms(&["", ""])).len(), 2);
            assert_eq!(idx.matches(&[]).len(), 2);
        }

        #[test]
        fn unbuildable_pattern_yields_no_matches() {
            let idx = index("<root><item><title>a(</title><link>u</link></item></root>");
            assert!(idx.matches(&terms(&["("])).is_empty());
        }

        #[test]
        fn subsearch_runs_fresh_over_the_full_set() {
            let idx = index(
                "<root>\
                 <item><title>alpha</title><link>http://a</link></item>\
                 <item><title>beta</title><link>http://b</link></item>\
                 </root>",
            );
            let narrowed = idx.matches(&terms(&["alpha"]));
            assert_eq!(narrowed.len(), 1);
            // Relaxing the terms again recovers entries the previous match
            // set had excluded.
            assert_eq!(idx.subsearch(&terms(&["a"])).len(), 2);
        }
    }
}

pub mod host {
    //! Seams to the process's surroundings: spawning a viewer and watching
    //! the bookmark file for changes.

    use anyhow::Result;
    use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
    use std::path::Path;
    use std::process::{Command, Stdio};
    use std::sync::mpsc::{self, Receiver};

    /// Process-spawn primitive. `true` iff the child process was started;
    /// nobody waits for it to finish.
    pub trait Launcher {
        fn spawn_async(&self, program: &str, args: &[String]) -> bool;
    }

    /// Spawns detached commands, dropping their stdio.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct ShellLauncher;

    impl Launcher for ShellLauncher {
        fn spawn_async(&self, program: &str, args: &[String]) -> bool {
            match Command::new(program)
                .args(args)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .spawn()
            {
                Ok(_) => true,
                Err(err) => {
                    log::warn!("could not run {program:?}: {err}");
                    false
                }
            }
        }
    }

    /// Watches a single file and surfaces "the contents may have changed"
    /// signals. Dropping the watcher cancels the underlying watch.
    pub struct FileWatcher {
        _watcher: RecommendedWatcher,
        rx: Receiver<notify::Result<Event>>,
    }

    impl FileWatcher {
        pub fn new(path: &Path) -> Result<Self> {
            let (tx, rx) = mpsc::channel();
            let mut watcher = RecommendedWatcher::new(
                move |res| {
                    let _ = tx.send(res);
                },
                Config::default(),
            )?;
            watcher.watch(path, RecursiveMode::NonRecursive)?;
            Ok(Self {
                _watcher: watcher,
                rx,
            })
        }

        /// Block until the next change signal. Returns `false` once the
        /// watch is gone and no further signals can arrive.
        pub fn wait(&self) -> bool {
            loop {
                match self.rx.recv() {
                    Ok(Ok(event)) if is_content_change(&event) => return true,
                    Ok(Ok(_)) => continue,
                    Ok(Err(err)) => {
                        log::warn!("watch error: {err}");
                        continue;
                    }
                    Err(_) => return false,
                }
            }
        }
    }

    impl std::fmt::Debug for FileWatcher {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("FileWatcher").finish_non_exhaustive()
        }
    }

    /// The signal carries no payload guarantee beyond "re-check the file",
    /// so only pure access notifications are filtered out.
    fn is_content_change(event: &Event) -> bool {
        !matches!(event.kind, EventKind::Access(_))
    }

}

pub mod store {
    //! The orchestrator: owns the current parse and its projections, and
    //! reacts to file-change signals by tearing everything down and
    //! rebuilding from a fresh parse. Rebuilds always replace state in full;
    //! there is no diffing against the previous generation.

    use crate::core::{BookmarkCollection, Mode};
    use crate::host::{FileWatcher, Launcher, ShellLauncher};
    use crate::menu::MenuTree;
    use crate::parser;
    use crate::search::{SearchEntry, SearchIndex};
    use std::path::{Path, PathBuf};

    /// Fallback viewer used when no explicit command is configured.
    pub const DEFAULT_VIEWER: &str = "xdg-open";

    #[derive(Debug, thiserror::Error)]
    pub enum StoreError {
        #[error("mode {0:?} selects none of MENU, SEARCH, OVERVIEW")]
        InvalidMode(Mode),
        #[error("store has been destroyed")]
        AlreadyDestroyed,
    }

    /// Live view over one bookmark file.
    ///
    /// Lifecycle: `init` → any number of `rebuild`s → `destroy` (terminal).
    /// Everything runs synchronously on the caller's thread; change signals
    /// queue on the watcher channel and the host drains them one full
    /// rebuild at a time, so later rebuilds simply supersede earlier state.
    pub struct BookmarkStore {
        mode: Mode,
        path: PathBuf,
        collection: BookmarkCollection,
        menu: Option<MenuTree>,
        index: Option<SearchIndex>,
        watcher: Option<FileWatcher>,
        launcher: Box<dyn Launcher>,
        viewer: Vec<String>,
        destroyed: bool,
    }

    impl BookmarkStore {
        /// Build the store and its first projection, then start watching
        /// the file. Watch setup failure is not fatal: the store keeps the
        /// state of the last successful rebuild, just without live updates.
        pub fn init(path: &Path, mode: Mode) -> Result<Self, StoreError> {
            if mode.is_empty() {
                return Err(StoreError::InvalidMode(mode));
            }

            let mut store = Self {
                mode,
                path: path.to_path_buf(),
                collection: BookmarkCollection::default(),
                menu: mode.contains(Mode::MENU).then(MenuTree::new),
                index: None,
                watcher: None,
                launcher: Box::new(ShellLauncher),
                viewer: vec![DEFAULT_VIEWER.to_string()],
                destroyed: false,
            };

            store.rebuild()?;

            match FileWatcher::new(&store.path) {
                Ok(watcher) => store.watcher = Some(watcher),
                Err(err) => {
                    log::warn!("no live updates for {:?}: {err}", store.path);
                }
            }

            Ok(store)
        }

        /// Replace the launch seam, e.g. with a recording fake in tests.
        pub fn with_launcher(mut self, launcher: Box<dyn Launcher>) -> Self {
            self.launcher = launcher;
            self
        }

        /// Replace the viewer argv the activated URL is appended to.
        pub fn with_viewer(mut self, viewer: Vec<String>) -> Self {
            if !viewer.is_empty() {
                self.viewer = viewer;
            }
            self
        }

        /// Full re-parse and re-projection, replacing all prior state.
        ///
        /// A failed parse is logged and projected as an empty collection;
        /// the store stays usable, just empty.
        pub fn rebuild(&mut self) -> Result<(), StoreError> {
            if self.destroyed {
                return Err(StoreError::AlreadyDestroyed);
            }

            self.index = None;
            self.collection = match parser::parse_file(&self.path) {
                Ok(collection) => collection,
                Err(err) => {
                    log::warn!("{err}; continuing with an empty collection");
                    BookmarkCollection::default()
                }
            };

            if let Some(menu) = self.menu.as_mut() {
                menu.rebuild_from(&self.collection);
            }

            if self.mode.contains(Mode::SEARCH) {
                self.index = Some(SearchIndex::from_collection(&self.collection));
            }

            Ok(())
        }

        /// Run the match predicate over the current search generation.
        /// Empty when SEARCH is not active or the store was destroyed.
        pub fn search(&self, terms: &[String]) -> Vec<&SearchEntry> {
            self.index
                .as_ref()
                .map(|index| index.matches(terms))
                .unwrap_or_default()
        }

        /// Open one search result in the configured viewer. Launch failure
        /// is logged, never propagated.
        pub fn activate(&self, position: usize) -> bool {
            let Some(entry) = self.index.as_ref().and_then(|i| i.entry(position)) else {
                log::warn!("no search entry at position {position}");
                return false;
            };

            let Some((program, prefix)) = self.viewer.split_first() else {
                return false;
            };
            let mut args: Vec<String> = prefix.to_vec();
            args.push(entry.url.clone());

            let launched = self.launcher.spawn_async(program, &args);
            if !launched {
                log::warn!("could not open {:?} with {program:?}", entry.url);
            }
            launched
        }

        /// Block until the file may have changed. `false` when no watch is
        /// active (setup failed or the store was destroyed), so host loops
        /// terminate instead of spinning.
        pub fn wait_for_change(&self) -> bool {
            match &self.watcher {
                Some(watcher) => watcher.wait(),
                None => false,
            }
        }

        /// Cancel the watch and release both projections. Safe to call at
        /// any time and idempotent; every later `rebuild` reports
        /// `AlreadyDestroyed`.
        pub fn destroy(&mut self) {
            if self.destroyed {
                return;
            }
            self.watcher = None;
            self.menu = None;
            self.index = None;
            self.collection = BookmarkCollection::default();
            self.destroyed = true;
        }

        pub fn mode(&self) -> Mode {
            self.mode
        }

        pub fn path(&self) -> &Path {
            &self.path
        }

        pub fn collection(&self) -> &BookmarkCollection {
            &self.collection
        }

        pub fn menu(&self) -> Option<&MenuTree> {
            self.menu.as_ref()
        }

        pub fn index(&self) -> Option<&SearchIndex> {
            self.index.as_ref()
        }

        pub fn is_destroyed(&self) -> bool {
            self.destroyed
        }
    }

    impl std::fmt::Debug for BookmarkStore {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("BookmarkStore")
                .field("mode", &self.mode)
                .field("path", &self.path)
                .field("destroyed", &self.destroyed)
                .finish_non_exhaustive()
        }
    }

}

pub use crate::core::{BookmarkCollection, BookmarkItem, Mode, TOOLBAR_SUBJECT};
pub use parser::{ParseError, parse_file};
pub use search::{SearchEntry, SearchIndex};
pub use store::{BookmarkStore, StoreError};

/// Construct a store over `path` with the default MENU | SEARCH mode.
pub fn enable(path: &std::path::Path) -> Result<BookmarkStore, StoreError> {
    BookmarkStore::init(path, Mode::default())
}

/// Tear the store down, cancelling its watch and releasing its projections.
pub fn disable(mut store: BookmarkStore) {
    store.destroy();
}
