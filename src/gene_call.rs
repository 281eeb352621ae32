//! Parsing of V/D/J gene calls into allele, gene and family lists.

use std::sync::OnceLock;

use itertools::Itertools;
use regex::Regex;
use serde::Serialize;

/// A normalized gene call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GeneCall {
    /// Allele identifiers, e.g. `IGHV3-23*01`.
    pub calls: Vec<String>,
    /// Genes, i.e. the calls without allele, e.g. `IGHV3-23`.
    pub genes: Vec<String>,
    /// Families, e.g. `IGHV3`.
    pub families: Vec<String>,
    /// The locus, e.g. `IGH`.
    pub locus: Option<String>,
}

impl GeneCall {
    /// The calls packed as comma-separated string.
    pub fn to_call_string(&self) -> String {
        self.calls.join(",")
    }
}

fn split_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[,| ]").expect("invalid regex"))
}

fn leading_zero_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(TR[AB]|IG[HKL])([VDJ])0").expect("invalid regex"))
}

fn is_valid_prefix(token: &str) -> bool {
    token.starts_with("IG") || token.starts_with("TR")
}

/// Parse a gene-call string into its normalized form.
///
/// The string is split on commas, spaces and vertical bars.  Tokens starting
/// with `IG` or `TR` are kept; tokens containing `-` get the locus and chain
/// prefix (first four characters of the input) prepended; everything else is
/// dropped.
pub fn parse(raw: &str) -> GeneCall {
    let raw = raw.trim();
    let prefix = raw.chars().take(4).collect::<String>();

    let calls = split_re()
        .split(raw)
        .filter(|token| !token.is_empty())
        .unique()
        .filter_map(|token| {
            if is_valid_prefix(token) {
                Some(token.to_string())
            } else if token.contains('-') {
                Some(format!("{}{}", prefix, token))
            } else {
                None
            }
        })
        .unique()
        .collect::<Vec<_>>();

    let genes = calls
        .iter()
        .map(|call| strip_from(call, &['*']))
        .unique()
        .collect();
    let families = calls
        .iter()
        .map(|call| strip_from(call, &['-', '*']))
        .unique()
        .collect();
    let locus = locus(&calls);

    GeneCall {
        calls,
        genes,
        families,
        locus,
    }
}

fn strip_from(call: &str, stops: &[char]) -> String {
    match call.find(stops) {
        Some(pos) => call[..pos].to_string(),
        None => call.to_string(),
    }
}

/// The locus of a list of calls: the first three characters of the first
/// call longer than three characters.
///
/// Shorter calls, inconsistent loci and loci that are neither IG nor TR are
/// reported.
pub fn locus(calls: &[String]) -> Option<String> {
    let mut usable = calls.iter().filter(|call| {
        let long_enough = call.chars().count() > 3;
        if !long_enough {
            tracing::warn!("cannot derive locus from gene call {:?}", call);
        }
        long_enough
    });
    let locus = usable.next()?.chars().take(3).collect::<String>();
    if calls.iter().any(|call| !call.starts_with(&locus)) {
        tracing::warn!("inconsistent loci across gene calls {:?}", calls);
    }
    if !is_valid_prefix(&locus) {
        tracing::warn!("locus {:?} is neither IG nor TR in {:?}", locus, calls);
    }
    Some(locus)
}

/// Rewrite a gene call of the legacy dialect to IMGT nomenclature.
///
/// The substitutions are applied in order, e.g. `TCRBV20-01*01` becomes
/// `TRBV20-1*01` and `TCRBV05-or09_02` becomes `TRBV5/OR9-2`.
pub fn rewrite_legacy(raw: &str) -> String {
    let rewritten = raw
        .replace("TCR", "TR")
        .replace("-or", "/OR")
        .replace("/OR0", "/OR")
        .replace('_', "-")
        .replace("-0", "-");
    leading_zero_re()
        .replace_all(&rewritten, "$1$2")
        .into_owned()
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;
    use tracing_test::traced_test;

    use super::{parse, rewrite_legacy, GeneCall};

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parse_single() {
        let call = parse("IGHV3-23*01");

        assert_eq!(
            call,
            GeneCall {
                calls: strings(&["IGHV3-23*01"]),
                genes: strings(&["IGHV3-23"]),
                families: strings(&["IGHV3"]),
                locus: Some("IGH".into()),
            }
        );
    }

    #[test]
    fn parse_multi_call() {
        let call = parse("IGHV3-23*01,IGHV3-23D*01");

        assert_eq!(call.calls, strings(&["IGHV3-23*01", "IGHV3-23D*01"]));
        assert_eq!(call.genes, strings(&["IGHV3-23", "IGHV3-23D"]));
        assert_eq!(call.families, strings(&["IGHV3"]));
        assert_eq!(call.locus.as_deref(), Some("IGH"));
    }

    #[test]
    fn parse_space_and_bar_separated() {
        let call = parse("IGHV3-23 IGHV3-23D|IGHV3-23");

        insta::assert_debug_snapshot!(call.calls, @r###"
        [
            "IGHV3-23",
            "IGHV3-23D",
        ]
        "###);
    }

    #[test]
    fn parse_drops_sentinels() {
        let call = parse("TRBV20-1*01 F or TRBV20-1*02 (see comment) [F] Homsap P");

        assert_eq!(call.calls, strings(&["TRBV20-1*01", "TRBV20-1*02"]));
        assert_eq!(call.genes, strings(&["TRBV20-1"]));
    }

    #[test]
    fn parse_prepends_prefix_to_bare_genes() {
        let call = parse("IGHV3-23*01, 3-30*02");

        assert_eq!(call.calls, strings(&["IGHV3-23*01", "IGHV3-30*02"]));
        assert_eq!(call.families, strings(&["IGHV3"]));
    }

    #[rstest::rstest]
    #[case("")]
    #[case("   ")]
    #[case("F")]
    fn parse_empty(#[case] raw: &str) {
        assert_eq!(parse(raw), GeneCall::default());
    }

    #[traced_test]
    #[test]
    fn parse_mixed_locus_warns() {
        let call = parse("TRBV20-1*01,TRAV1-2*01");

        assert_eq!(call.locus.as_deref(), Some("TRB"));
        assert!(logs_contain("inconsistent loci"));
    }

    #[traced_test]
    #[test]
    fn locus_skips_short_calls() {
        let call = parse("TRB,TRBV20-1*01");

        assert_eq!(call.calls, strings(&["TRB", "TRBV20-1*01"]));
        assert_eq!(call.locus.as_deref(), Some("TRB"));
        assert!(logs_contain("cannot derive locus from gene call \"TRB\""));
    }

    #[test]
    fn locus_of_short_calls_only() {
        assert_eq!(super::locus(&strings(&["IGH"])), None);
        assert_eq!(super::locus(&[]), None);
    }

    #[rstest::rstest]
    #[case("TCRBV20-01*01", "TRBV20-1*01")]
    #[case("TCRBV05-01", "TRBV5-1")]
    #[case("TCRBJ02-07*01", "TRBJ2-7*01")]
    #[case("TCRBD01-01", "TRBD1-1")]
    #[case("TCRBV05-or09_02", "TRBV5/OR9-2")]
    #[case("IGHV03-23*01", "IGHV3-23*01")]
    #[case("TRBV20-1*01", "TRBV20-1*01")]
    fn rewrite_legacy_calls(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(rewrite_legacy(raw), expected);
    }

    #[test]
    fn legacy_call_end_to_end() {
        let call = parse(&rewrite_legacy("TCRBV20-01*01"));

        assert_eq!(call.calls, strings(&["TRBV20-1*01"]));
        assert_eq!(call.genes, strings(&["TRBV20-1"]));
        assert_eq!(call.families, strings(&["TRBV20"]));
        assert_eq!(call.locus.as_deref(), Some("TRB"));
    }

    #[rstest::rstest]
    #[case("IGHV3-23*01")]
    #[case("IGHV3-23*01,IGHV3-23D*01")]
    #[case("IGHV3-23 IGHV3-23D|IGHV1-2*02")]
    #[case("TRBV20-1*01 F or TRBV20-1*02")]
    #[case("IGKV1-39*01, 1-33*01")]
    fn parse_is_idempotent(#[case] raw: &str) {
        let once = parse(raw);
        let twice = parse(&once.to_call_string());

        assert_eq!(once, twice);
    }

    #[rstest::rstest]
    #[case("IGHV3-23*01,IGHV1-2*02")]
    #[case("TRBV20-1*01,TRBV5-1*01")]
    fn locus_is_prefix_of_every_call(#[case] raw: &str) {
        let call = parse(raw);
        let locus = call.locus.clone().unwrap();

        assert!(call.calls.iter().all(|c| c[..3] == locus));
    }
}
