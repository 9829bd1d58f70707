//! Letterboxd diary summaries.
//! Parses a diary export into records and folds them into an ordered grouping tree keyed by
//! watch period, tag hierarchy and release decade. The core is pure: parsing text and building
//! trees never touch the filesystem or keep state between calls.

pub mod core {
    use indexmap::IndexMap;
    use serde::{Deserialize, Serialize};
    use std::{fmt, str::FromStr};

    /* ------------------------------ Records ------------------------------ */

    /// One diary row: a single logged viewing. Immutable once parsed.
    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    pub struct DiaryRecord {
        /// `Date` column: when the entry was logged.
        pub logged_date: String,

        /// `Name` column. Records without a title never reach the grouping tree.
        pub title: String,

        /// `Year` column: theatrical release year, if it parsed as a number.
        pub release_year: Option<i32>,

        /// `Letterboxd URI` column.
        pub source_uri: String,

        /// `Rating` column (0.5 to 5.0 on Letterboxd).
        pub rating: Option<f64>,

        /// `Rewatch` column; `None` when the column is empty.
        pub is_rewatch: Option<bool>,

        /// Unmodified `Tags` column.
        pub raw_tags: String,

        /// `Watched Date` column. Drives time bucketing.
        pub watched_date: String,

        /// Individual tags in source order, separators still present.
        #[serde(default)]
        pub tag_paths: Vec<String>,
    }

    /* ---------------------------- Parameters ---------------------------- */

    /// Text that splits a tag into hierarchy levels (`with:family:kids`). Never empty.
    #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(try_from = "String", into = "String")]
    pub struct Separator(String);

    impl Separator {
        pub fn new(text: impl Into<String>) -> Result<Self, DomainError> {
            let text = text.into();
            if text.is_empty() {
                return Err(DomainError::EmptySeparator);
            }
            Ok(Self(text))
        }

        pub fn as_str(&self) -> &str {
            &self.0
        }
    }

    impl Default for Separator {
        fn default() -> Self {
            Self(":".to_string())
        }
    }

    impl TryFrom<String> for Separator {
        type Error = DomainError;

        fn try_from(text: String) -> Result<Self, Self::Error> {
            Self::new(text)
        }
    }

    impl From<Separator> for String {
        fn from(separator: Separator) -> Self {
            separator.0
        }
    }

    impl FromStr for Separator {
        type Err = DomainError;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            Self::new(s)
        }
    }

    impl fmt::Display for Separator {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(&self.0)
        }
    }

    /// Size of the time bucket that sits above the tag hierarchy.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum Granularity {
        Year,
        #[default]
        Month,
        /// Year, month, then week of month (days 1-7 are week 1).
        Week,
    }

    impl FromStr for Granularity {
        type Err = DomainError;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            match s.trim().to_ascii_lowercase().as_str() {
                "year" => Ok(Self::Year),
                "month" => Ok(Self::Month),
                "week" => Ok(Self::Week),
                _ => Err(DomainError::UnknownGranularity(s.to_string())),
            }
        }
    }

    impl fmt::Display for Granularity {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(match self {
                Self::Year => "year",
                Self::Month => "month",
                Self::Week => "week",
            })
        }
    }

    /* ---------------------------- Grouping tree ---------------------------- */

    /// A value in the grouping tree: titles collected under a key, or a nested level.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(untagged)]
    pub enum GroupValue {
        Leaf(Vec<String>),
        Branch(GroupingNode),
    }

    impl GroupValue {
        /// Number of titles at or below this value.
        pub fn title_count(&self) -> usize {
            match self {
                Self::Leaf(titles) => titles.len(),
                Self::Branch(node) => node.title_count(),
            }
        }

        pub fn as_leaf(&self) -> Option<&[String]> {
            match self {
                Self::Leaf(titles) => Some(titles),
                Self::Branch(_) => None,
            }
        }

        pub fn as_branch(&self) -> Option<&GroupingNode> {
            match self {
                Self::Branch(node) => Some(node),
                Self::Leaf(_) => None,
            }
        }
    }

    /// Ordered key → value map. Sibling order is the order keys were first inserted.
    ///
    /// Equality is order-sensitive: two trees are equal only when every level lists the same
    /// keys in the same order with equal values.
    #[derive(Debug, Clone, Default, Eq, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct GroupingNode {
        entries: IndexMap<String, GroupValue>,
    }

    impl PartialEq for GroupingNode {
        fn eq(&self, other: &Self) -> bool {
            self.entries.len() == other.entries.len()
                && self.entries.iter().zip(other.entries.iter()).all(|(a, b)| a == b)
        }
    }

    impl GroupingNode {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn is_empty(&self) -> bool {
            self.entries.is_empty()
        }

        pub fn len(&self) -> usize {
            self.entries.len()
        }

        pub fn get(&self, key: &str) -> Option<&GroupValue> {
            self.entries.get(key)
        }

        pub fn keys(&self) -> impl Iterator<Item = &str> {
            self.entries.keys().map(String::as_str)
        }

        pub fn iter(&self) -> impl Iterator<Item = (&str, &GroupValue)> {
            self.entries.iter().map(|(k, v)| (k.as_str(), v))
        }

        /// Total titles in the subtree.
        pub fn title_count(&self) -> usize {
            self.entries.values().map(GroupValue::title_count).sum()
        }

        /// Follow `path` key by key through nested branches.
        pub fn lookup(&self, path: &[&str]) -> Option<&GroupValue> {
            let (first, rest) = path.split_first()?;
            let value = self.entries.get(*first)?;
            if rest.is_empty() {
                return Some(value);
            }
            value.as_branch()?.lookup(rest)
        }

        pub fn leaf(&self, path: &[&str]) -> Option<&[String]> {
            self.lookup(path)?.as_leaf()
        }

        pub fn branch(&self, path: &[&str]) -> Option<&GroupingNode> {
            self.lookup(path)?.as_branch()
        }

        /// Run `f` on the nested level at `path`, creating missing levels on the way down.
        ///
        /// A leaf met along the path becomes a branch in place; its titles move under the
        /// empty-string key of the new branch so nothing accumulated so far is lost.
        pub fn with_branch<S: AsRef<str>, R>(
            &mut self,
            path: &[S],
            f: impl FnOnce(&mut GroupingNode) -> R,
        ) -> R {
            let Some((first, rest)) = path.split_first() else {
                return f(self);
            };
            let slot = self
                .entries
                .entry(first.as_ref().to_string())
                .or_insert_with(|| GroupValue::Branch(GroupingNode::new()));
            match slot {
                GroupValue::Branch(node) => node.with_branch(rest, f),
                GroupValue::Leaf(titles) => {
                    let mut node = GroupingNode::new();
                    node.entries
                        .insert(String::new(), GroupValue::Leaf(std::mem::take(titles)));
                    let out = node.with_branch(rest, f);
                    *slot = GroupValue::Branch(node);
                    out
                }
            }
        }

        /// Append `title` to the leaf at `key`, creating the leaf on first use.
        /// When `key` already holds a branch the title goes to that branch's empty-string key.
        pub fn push_title(&mut self, key: &str, title: &str) {
            match self
                .entries
                .entry(key.to_string())
                .or_insert_with(|| GroupValue::Leaf(Vec::new()))
            {
                GroupValue::Leaf(titles) => titles.push(title.to_string()),
                GroupValue::Branch(node) => node.push_title("", title),
            }
        }
    }

    /* ---------------------------- Errors (domain) ---------------------------- */

    #[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
    pub enum DomainError {
        #[error("tag separator must not be empty")]
        EmptySeparator,
        #[error("unknown grouping granularity {0:?} (expected year, month or week)")]
        UnknownGranularity(String),
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn empty_separator_is_rejected() {
            assert_eq!(Separator::new(""), Err(DomainError::EmptySeparator));
            assert_eq!(Separator::new(" / ").unwrap().as_str(), " / ");
            assert_eq!(Separator::default().as_str(), ":");
        }

        #[test]
        fn granularity_parses_case_insensitively() {
            assert_eq!("Week".parse::<Granularity>(), Ok(Granularity::Week));
            assert_eq!(" year ".parse::<Granularity>(), Ok(Granularity::Year));
            assert!(matches!(
                "fortnight".parse::<Granularity>(),
                Err(DomainError::UnknownGranularity(s)) if s == "fortnight"
            ));
            assert_eq!(Granularity::default(), Granularity::Month);
        }

        #[test]
        fn with_branch_upgrades_leaf_in_place() {
            let mut node = GroupingNode::new();
            node.push_title("first", "A");
            node.push_title("drama", "B");
            node.push_title("last", "C");
            node.with_branch(&["drama"], |drama| drama.push_title("french", "D"));

            assert_eq!(node.keys().collect::<Vec<_>>(), ["first", "drama", "last"]);
            let drama = node.branch(&["drama"]).expect("drama branch");
            assert_eq!(drama.keys().collect::<Vec<_>>(), ["", "french"]);
            assert_eq!(node.leaf(&["drama", ""]).unwrap(), ["B"]);
            assert_eq!(node.title_count(), 4);
        }

        #[test]
        fn push_title_onto_branch_uses_empty_key() {
            let mut node = GroupingNode::new();
            node.with_branch(&["genre"], |genre| genre.push_title("drama", "A"));
            node.push_title("genre", "B");
            assert_eq!(node.leaf(&["genre", ""]).unwrap(), ["B"]);
            assert_eq!(node.leaf(&["genre", "drama"]).unwrap(), ["A"]);
        }

        #[test]
        fn equality_respects_sibling_order() {
            let mut a = GroupingNode::new();
            a.push_title("x", "1");
            a.push_title("y", "2");
            let mut b = GroupingNode::new();
            b.push_title("y", "2");
            b.push_title("x", "1");
            assert_ne!(a, b);
            assert_eq!(a, a.clone());
        }

        #[test]
        fn tree_serializes_as_lists_and_objects() {
            let mut node = GroupingNode::new();
            node.with_branch(&["2024"], |year| year.push_title("1990s", "Heat"));
            node.push_title("loose", "Alien");
            let json = serde_json::to_string(&node).unwrap();
            assert_eq!(json, r#"{"2024":{"1990s":["Heat"]},"loose":["Alien"]}"#);

            let back: GroupingNode = serde_json::from_str(&json).unwrap();
            assert_eq!(back, node);
        }

        #[test]
        fn separator_deserialization_validates() {
            let err = serde_json::from_str::<Separator>(r#""""#);
            assert!(err.is_err());
            let sep: Separator = serde_json::from_str(r#""/""#).unwrap();
            assert_eq!(sep.as_str(), "/");
        }
    }
}

pub mod storage {
    use super::core::DiaryRecord;
    use anyhow::Result;
    use std::path::Path;

    /// Reading an export is kept apart from grouping it.
    pub trait DiaryParser {
        fn parse_file(&self, abs_path: &Path) -> Result<Vec<DiaryRecord>>;
    }
}

pub mod calendar {
    //! The one date format diary exports use: `YYYY-MM-DD`.

    use chrono::{Datelike, NaiveDate};
    use nom::{
        IResult,
        bytes::complete::take_while_m_n,
        character::complete::char,
        combinator::{all_consuming, map_res},
        error::VerboseError,
        sequence::tuple,
    };

    type PResult<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

    /// Parse a calendar date, ignoring surrounding whitespace. Month and day may drop their
    /// leading zero. Anything else, including impossible dates, yields `None`.
    pub fn parse_calendar_date(text: &str) -> Option<NaiveDate> {
        all_consuming(parse_date)(text.trim())
            .ok()
            .map(|(_, date)| date)
    }

    /// Week of the month: days 1-7 are week 1, 8-14 week 2, up to week 5.
    pub fn week_of_month(date: NaiveDate) -> u32 {
        date.day().div_ceil(7)
    }

    fn parse_date(i: &str) -> PResult<'_, NaiveDate> {
        map_res(
            tuple((
                map_res(take_while_m_n(4, 4, char_is_digit), |s: &str| {
                    s.parse::<i32>()
                }),
                char('-'),
                map_res(take_while_m_n(1, 2, char_is_digit), |s: &str| {
                    s.parse::<u32>()
                }),
                char('-'),
                map_res(take_while_m_n(1, 2, char_is_digit), |s: &str| {
                    s.parse::<u32>()
                }),
            )),
            |(y, _, m, _, d)| NaiveDate::from_ymd_opt(y, m, d).ok_or("invalid date"),
        )(i)
    }

    fn char_is_digit(c: char) -> bool {
        c.is_ascii_digit()
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn accepts_iso_dates() {
            assert_eq!(
                parse_calendar_date("2024-03-09"),
                NaiveDate::from_ymd_opt(2024, 3, 9)
            );
            assert_eq!(
                parse_calendar_date(" 2024-3-9 "),
                NaiveDate::from_ymd_opt(2024, 3, 9)
            );
        }

        #[test]
        fn rejects_other_text() {
            for text in ["", "2024-02-30", "03/09/2024", "2024-03-09T10:00", "next tuesday"] {
                assert_eq!(parse_calendar_date(text), None, "{text:?}");
            }
        }

        #[test]
        fn week_boundaries_fall_every_seven_days() {
            let week = |d| week_of_month(NaiveDate::from_ymd_opt(2024, 3, d).unwrap());
            assert_eq!(
                [week(1), week(7), week(8), week(14), week(15), week(28), week(29), week(31)],
                [1, 1, 2, 2, 3, 4, 5, 5]
            );
        }
    }
}

pub mod parser {
    //! Letterboxd diary CSV reader.
    //!
    //! Parsing is permissive. Only text without a header and at least one data row yields
    //! nothing; fields that fail to parse become `None` or empty strings and the row is kept.
    //! - Lines end in `\n` or `\r\n`; blank lines are dropped.
    //! - The header splits on every comma. Data rows split only on commas outside a `"…"` pair.
    //! - Columns are found by exact header name, so column order in the export does not matter.

    use crate::core::DiaryRecord;
    use crate::storage::DiaryParser;
    use anyhow::{Context, Result};
    use std::{fs, path::Path};
    use tracing::debug;

    pub const COL_DATE: &str = "Date";
    pub const COL_NAME: &str = "Name";
    pub const COL_YEAR: &str = "Year";
    pub const COL_URI: &str = "Letterboxd URI";
    pub const COL_RATING: &str = "Rating";
    pub const COL_REWATCH: &str = "Rewatch";
    pub const COL_TAGS: &str = "Tags";
    pub const COL_WATCHED_DATE: &str = "Watched Date";

    /* ------------------------ Public entry points ------------------------ */

    /// Parse a diary export from a string. One record per non-blank data line, in order.
    pub fn parse_diary_from_str(input: &str) -> Vec<DiaryRecord> {
        let input = input.strip_prefix('\u{feff}').unwrap_or(input);
        let lines: Vec<&str> = input.lines().filter(|l| !l.trim().is_empty()).collect();
        let Some((header, rows)) = lines.split_first() else {
            debug!("diary export is empty");
            return Vec::new();
        };
        if rows.is_empty() {
            debug!("diary export has a header but no rows");
            return Vec::new();
        }

        let columns = Columns::locate(header);
        rows.iter().map(|row| columns.record(row)).collect()
    }

    /// Concrete parser implementing the `storage::DiaryParser` trait.
    pub struct CsvDiaryParser;

    impl DiaryParser for CsvDiaryParser {
        fn parse_file(&self, abs_path: &Path) -> Result<Vec<DiaryRecord>> {
            let text =
                fs::read_to_string(abs_path).with_context(|| format!("reading {:?}", abs_path))?;
            let records = parse_diary_from_str(&text);
            debug!(path = %abs_path.display(), records = records.len(), "parsed diary export");
            Ok(records)
        }
    }

    /* ------------------------------ Rows ------------------------------ */

    /// Split a data row on commas that sit outside a quoted span.
    ///
    /// A comma delimits when an even number of `"` follow it on the line. Fields keep their
    /// quotes.
    pub fn split_fields(line: &str) -> Vec<&str> {
        let mut quotes_ahead = line.matches('"').count();
        let mut fields = Vec::new();
        let mut start = 0;
        for (idx, ch) in line.char_indices() {
            match ch {
                '"' => quotes_ahead -= 1,
                ',' if quotes_ahead % 2 == 0 => {
                    fields.push(&line[start..idx]);
                    start = idx + 1;
                }
                _ => {}
            }
        }
        fields.push(&line[start..]);
        fields
    }

    /// Split a `Tags` cell into individual tags.
    ///
    /// One leading and one trailing quote are stripped, then the text splits on commas.
    /// Pieces are trimmed and empty ones dropped.
    pub fn split_tags(raw: &str) -> Vec<String> {
        let unquoted = raw.strip_prefix('"').unwrap_or(raw);
        let unquoted = unquoted.strip_suffix('"').unwrap_or(unquoted);
        unquoted
            .split(',')
            .map(str::trim)
            .filter(|tag| !tag.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Header positions of the columns we read. `None` when the export lacks the column.
    struct Columns {
        date: Option<usize>,
        name: Option<usize>,
        year: Option<usize>,
        uri: Option<usize>,
        rating: Option<usize>,
        rewatch: Option<usize>,
        tags: Option<usize>,
        watched_date: Option<usize>,
    }

    impl Columns {
        fn locate(header: &str) -> Self {
            let names: Vec<&str> = header.split(',').collect();
            let find = |name: &str| names.iter().position(|column| *column == name);
            let columns = Self {
                date: find(COL_DATE),
                name: find(COL_NAME),
                year: find(COL_YEAR),
                uri: find(COL_URI),
                rating: find(COL_RATING),
                rewatch: find(COL_REWATCH),
                tags: find(COL_TAGS),
                watched_date: find(COL_WATCHED_DATE),
            };
            if columns.name.is_none() || columns.watched_date.is_none() {
                debug!(header, "diary header lacks Name or Watched Date");
            }
            columns
        }

        fn record(&self, line: &str) -> DiaryRecord {
            let fields = split_fields(line);
            let get = |index: Option<usize>| field(&fields, index);
            let tags = get(self.tags);
            DiaryRecord {
                logged_date: get(self.date).to_string(),
                title: get(self.name).to_string(),
                release_year: parse_year(get(self.year)),
                source_uri: get(self.uri).to_string(),
                rating: parse_rating(get(self.rating)),
                is_rewatch: parse_rewatch(get(self.rewatch)),
                raw_tags: tags.to_string(),
                watched_date: get(self.watched_date).to_string(),
                tag_paths: split_tags(tags),
            }
        }
    }

    fn field<'a>(fields: &[&'a str], index: Option<usize>) -> &'a str {
        index.and_then(|i| fields.get(i).copied()).unwrap_or("")
    }

    /* ------------------------------ Fields ------------------------------ */

    /// Whole-number text first; otherwise any finite number, floored (`1994.0` → 1994).
    fn parse_year(text: &str) -> Option<i32> {
        let text = text.trim();
        if let Ok(year) = text.parse::<i32>() {
            return Some(year);
        }
        let year = text.parse::<f64>().ok().filter(|y| y.is_finite())?.floor();
        (f64::from(i32::MIN)..=f64::from(i32::MAX))
            .contains(&year)
            .then_some(year as i32)
    }

    fn parse_rating(text: &str) -> Option<f64> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        text.parse::<f64>().ok().filter(|r| r.is_finite())
    }

    fn parse_rewatch(text: &str) -> Option<bool> {
        if text.is_empty() {
            None
        } else {
            Some(text.eq_ignore_ascii_case("yes"))
        }
    }

}

pub mod grouping {
    //! Folds diary records into a [`GroupingNode`] tree.
    //!
    //! Layout under the root, per record:
    //! - a time bucket path (`2024` / `3` / `Week 2`, depending on [`Granularity`]);
    //! - under the bucket, one path per tag, split on the separator;
    //! - next to the tags, a `1990s` style decade leaf from the release year.
    //!
    //! Every call builds a fresh tree. Nothing is cached between calls.

    use crate::calendar::{parse_calendar_date, week_of_month};
    use crate::core::*;
    use chrono::Datelike;
    use tracing::debug;

    /// Bucket for records whose watched date does not parse.
    pub const UNKNOWN_BUCKET: &str = "Unknown";

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum EmptyPieces {
        Keep,
        Drop,
    }

    /// Build the bucketed tag tree for `records`.
    pub fn build<'a>(
        records: impl IntoIterator<Item = &'a DiaryRecord>,
        separator: &Separator,
        granularity: Granularity,
    ) -> GroupingNode {
        let mut root = GroupingNode::new();
        let mut folded = 0usize;
        let mut untitled = 0usize;
        for record in records {
            if record.title.is_empty() {
                untitled += 1;
                continue;
            }
            let path = bucket_path(&record.watched_date, granularity);
            root.with_branch(path.as_slice(), |bucket| {
                for tag in &record.tag_paths {
                    fold_tag(bucket, tag, separator, &record.title, EmptyPieces::Keep);
                }
                if let Some(key) = record.release_year.and_then(decade_key) {
                    bucket.push_title(&key, &record.title);
                }
            });
            folded += 1;
        }
        debug!(folded, untitled, %granularity, %separator, "built grouping tree");
        root
    }

    /// Tag hierarchy across the whole diary, without time buckets or decades.
    /// Empty pieces are dropped, so `with::kids` folds as `with → kids`.
    pub fn build_tag_tree<'a>(
        records: impl IntoIterator<Item = &'a DiaryRecord>,
        separator: &Separator,
    ) -> GroupingNode {
        let mut root = GroupingNode::new();
        for record in records.into_iter().filter(|r| !r.title.is_empty()) {
            for tag in &record.tag_paths {
                fold_tag(&mut root, tag, separator, &record.title, EmptyPieces::Drop);
            }
        }
        root
    }

    /// Keys from the root down to the time bucket of a watched date.
    pub fn bucket_path(watched_date: &str, granularity: Granularity) -> Vec<String> {
        let Some(date) = parse_calendar_date(watched_date) else {
            return vec![UNKNOWN_BUCKET.to_string()];
        };
        let year = date.year().to_string();
        match granularity {
            Granularity::Year => vec![year],
            Granularity::Month => vec![year, date.month().to_string()],
            Granularity::Week => vec![
                year,
                date.month().to_string(),
                format!("Week {}", week_of_month(date)),
            ],
        }
    }

    /// `1994` → `1990s`. Year zero counts as missing.
    pub fn decade_key(release_year: i32) -> Option<String> {
        if release_year == 0 {
            return None;
        }
        Some(format!("{}s", i64::from(release_year).div_euclid(10) * 10))
    }

    fn fold_tag(
        parent: &mut GroupingNode,
        tag: &str,
        separator: &Separator,
        title: &str,
        empty: EmptyPieces,
    ) {
        let pieces: Vec<&str> = tag
            .split(separator.as_str())
            .map(str::trim)
            .filter(|piece| empty == EmptyPieces::Keep || !piece.is_empty())
            .collect();
        if pieces.iter().all(|piece| piece.is_empty()) {
            return;
        }
        let Some((leaf, branches)) = pieces.split_last() else {
            return;
        };
        parent.with_branch(branches, |node| node.push_title(leaf, title));
    }

}

pub mod summary {
    //! Holds a loaded diary and the parameters it is currently grouped by.

    use crate::core::*;
    use crate::grouping;
    use serde::{Deserialize, Serialize};
    use tracing::debug;

    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct SummaryOptions {
        pub separator: Separator,
        #[serde(rename = "group_by")]
        pub granularity: Granularity,
    }

    /// The diary plus its current grouping tree.
    ///
    /// Every change rebuilds the tree from the records and replaces the previous one in a
    /// single assignment, so readers only ever see complete trees.
    #[derive(Debug, Clone)]
    pub struct Summary {
        records: Vec<DiaryRecord>,
        options: SummaryOptions,
        tree: GroupingNode,
    }

    impl Summary {
        pub fn new(records: Vec<DiaryRecord>, options: SummaryOptions) -> Self {
            let tree = grouping::build(&records, &options.separator, options.granularity);
            Self {
                records,
                options,
                tree,
            }
        }

        pub fn records(&self) -> &[DiaryRecord] {
            &self.records
        }

        pub fn options(&self) -> &SummaryOptions {
            &self.options
        }

        pub fn tree(&self) -> &GroupingNode {
            &self.tree
        }

        pub fn into_tree(self) -> GroupingNode {
            self.tree
        }

        pub fn set_records(&mut self, records: Vec<DiaryRecord>) {
            self.records = records;
            self.rebuild();
        }

        pub fn set_separator(&mut self, separator: Separator) {
            self.options.separator = separator;
            self.rebuild();
        }

        pub fn set_granularity(&mut self, granularity: Granularity) {
            self.options.granularity = granularity;
            self.rebuild();
        }

        fn rebuild(&mut self) {
            debug!(records = self.records.len(), "rebuilding summary");
            self.tree = grouping::build(
                &self.records,
                &self.options.separator,
                self.options.granularity,
            );
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::parse_diary_from_str;

        const DIARY: &str = "\
Date,Name,Year,Letterboxd URI,Rating,Rewatch,Tags,Watched Date
2024-03-10,Heat,1995,https://boxd.it/1,4.5,,\"genre:crime, with/friends\",2024-03-09
2024-04-02,Alien,1979,https://boxd.it/2,4,Yes,genre:horror,2024-04-01
";

        #[test]
        fn defaults_group_by_month_on_colon() {
            let summary = Summary::new(parse_diary_from_str(DIARY), SummaryOptions::default());
            assert_eq!(summary.options().separator.as_str(), ":");
            assert_eq!(summary.options().granularity, Granularity::Month);
            assert_eq!(summary.records().len(), 2);
            assert_eq!(
                summary.tree().leaf(&["2024", "4", "genre", "horror"]).unwrap(),
                ["Alien"]
            );
        }

        #[test]
        fn parameter_changes_match_a_fresh_build() {
            let records = parse_diary_from_str(DIARY);
            let mut summary = Summary::new(records.clone(), SummaryOptions::default());

            summary.set_granularity(Granularity::Week);
            let slash = Separator::new("/").unwrap();
            summary.set_separator(slash.clone());

            let fresh = grouping::build(&records, &slash, Granularity::Week);
            assert_eq!(summary.tree(), &fresh);
            assert_eq!(
                summary.tree().leaf(&["2024", "3", "Week 2", "with", "friends"]).unwrap(),
                ["Heat"]
            );
        }

        #[test]
        fn replacing_records_discards_old_tree() {
            let mut summary = Summary::new(parse_diary_from_str(DIARY), SummaryOptions::default());
            summary.set_records(Vec::new());
            assert!(summary.tree().is_empty());
            assert!(summary.into_tree().is_empty());
        }

        #[test]
        fn options_deserialize_with_defaults() {
            let options: SummaryOptions = serde_json::from_str(r#"{"group_by":"week"}"#).unwrap();
            assert_eq!(options.granularity, Granularity::Week);
            assert_eq!(options.separator, Separator::default());
        }
    }
}

pub mod render {
    use crate::core::{GroupValue, GroupingNode};
    use std::fmt::Write;

    /// Label printed for the empty-string key.
    pub const UNTAGGED_LABEL: &str = "(untagged)";

    /// Indented outline, two spaces per level. Every key shows its title count.
    pub fn render_outline(tree: &GroupingNode) -> String {
        let mut out = String::new();
        write_node(&mut out, tree, 0);
        out
    }

    pub fn render_json(tree: &GroupingNode) -> serde_json::Result<String> {
        serde_json::to_string_pretty(tree)
    }

    fn write_node(out: &mut String, node: &GroupingNode, depth: usize) {
        let indent = "  ".repeat(depth);
        for (key, value) in node.iter() {
            let label = if key.is_empty() { UNTAGGED_LABEL } else { key };
            match value {
                GroupValue::Leaf(titles) => {
                    let _ = writeln!(
                        out,
                        "{indent}{label} ({}): {}",
                        titles.len(),
                        titles.join(", ")
                    );
                }
                GroupValue::Branch(child) => {
                    let _ = writeln!(out, "{indent}{label} ({})", child.title_count());
                    write_node(out, child, depth + 1);
                }
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        fn sample() -> GroupingNode {
            let mut root = GroupingNode::new();
            root.with_branch(&["2024", "3"], |march| {
                march.with_branch(&["with"], |with| with.push_title("friends", "Heat"));
                march.push_title("with", "Alien");
                march.push_title("1990s", "Heat");
            });
            root
        }

        #[test]
        fn outline_indents_and_counts() {
            let expected = "\
2024 (3)
  3 (3)
    with (2)
      friends (1): Heat
      (untagged) (1): Alien
    1990s (1): Heat
";
            assert_eq!(render_outline(&sample()), expected);
            assert_eq!(render_outline(&GroupingNode::new()), "");
        }

        #[test]
        fn json_keeps_insertion_order() {
            let json = render_json(&sample()).unwrap();
            let with = json.find("\"with\"").unwrap();
            let decade = json.find("\"1990s\"").unwrap();
            assert!(with < decade);
            assert!(json.contains("\"friends\": [\n"));
        }
    }
}

pub use grouping::{build, build_tag_tree};
pub use parser::{CsvDiaryParser, parse_diary_from_str};
pub use render::render_outline;
