//! Case-insensitive suffix matching, shared by the auth-zone lookup, the
//! best-delegation walk and the domain map. Grounded on PowerDNS's
//! `moreSpecificThan` helper and the longest-suffix-match walk used
//! throughout `syncres.hh`.

use crate::model::Name;

/// True iff `a` is the same name as, or a subdomain of, `b` — i.e. `a` is at
/// least as specific as `b`. Comparison is ASCII case-folded label-by-label,
/// not a raw suffix-of-string check, so `notexample.test` is not considered
/// a subdomain of `example.test`.
pub fn more_specific_than(a: &Name, b: &Name) -> bool {
	if b.0.is_empty() {
		return true; // the root is an ancestor of everything
	}

	let a = a.fold();
	let b = b.fold();

	if a == b {
		return true;
	}

	a.ends_with(&b) && a.as_bytes()[a.len() - b.len() - 1] == b'.'
}

/// Walks `candidates` (assumed to be zone names known to a domain map or a
/// delegation cache) and returns the one that is the longest ancestor of
/// `qname`, i.e. the most specific zone cut covering it.
pub fn longest_suffix_match<'a, I>(qname: &Name, candidates: I) -> Option<&'a Name>
where
	I: IntoIterator<Item = &'a Name>,
{
	candidates
		.into_iter()
		.filter(|candidate| more_specific_than(qname, candidate))
		.max_by_key(|candidate| candidate.fold().len())
}

/// `qname` itself, then each successive parent, down to the root — the walk
/// order the best-delegation lookup needs to find the longest ancestor of
/// `qname` for which NS records are cached.
pub fn ancestors(qname: &Name) -> Vec<Name> {
	let folded = qname.fold();
	let mut out = Vec::new();

	if !folded.is_empty() {
		let labels: Vec<&str> = folded.split('.').collect();
		for i in 0..labels.len() {
			out.push(Name(labels[i..].join(".")));
		}
	}

	out.push(Name::root());
	out
}
