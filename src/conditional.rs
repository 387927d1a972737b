use std::collections::HashMap;

use crate::DavInner;
use crate::davheaders::{self, ETag, IfItem};
use crate::davpath::DavPath;
use crate::errors::DavResult;
use crate::resolver::ResourceScope;

/// A state token that never names a lock. Used here as "is there a lock".
const NO_LOCK: &str = "DAV:no-lock";

/// One sub-condition and the outcome it needs.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Match<T> {
    pub must_match: bool,
    pub value: T,
}

/// One OR-branch of an `If` header: every condition in it must hold.
#[derive(Debug, Clone, PartialEq, Default)]
pub(crate) struct IfCondition {
    /// Resource the branch is about. `None` is the request's own resource.
    pub path: Option<DavPath>,
    /// Set when the tagged resource URL could not be mapped.
    pub bad_path: bool,
    pub tokens: Vec<Match<String>>,
    pub etags: Vec<Match<ETag>>,
    /// `must_match == true`: a lock must exist. `false`: there must be none.
    pub have_lock: Vec<Match<()>>,
}

impl IfCondition {
    // `(<DAV:no-lock>)` asks for "no lock", `(Not <DAV:no-lock>)` for "a lock".
    fn from_list(list: &davheaders::IfList, prefix: &str) -> IfCondition {
        let mut cond = IfCondition::default();
        if let Some(url) = &list.resource_tag {
            match DavPath::from_url(url, prefix) {
                Ok(p) => cond.path = Some(p),
                Err(_) => cond.bad_path = true,
            }
        }
        for c in &list.conditions {
            match &c.item {
                IfItem::StateToken(t) if t == NO_LOCK => cond.have_lock.push(Match {
                    must_match: c.not,
                    value: (),
                }),
                IfItem::StateToken(t) => cond.tokens.push(Match {
                    must_match: !c.not,
                    value: t.clone(),
                }),
                IfItem::ETag(e) => cond.etags.push(Match {
                    must_match: !c.not,
                    value: e.clone(),
                }),
            }
        }
        cond
    }
}

/// Turn a parsed `If` header into OR-branches.
pub(crate) fn if_conditions(hdr: &davheaders::If, prefix: &str) -> Vec<IfCondition> {
    hdr.0.iter().map(|l| IfCondition::from_list(l, prefix)).collect()
}

/// All lock tokens in the header that are asserted positively. These are
/// the tokens the client "submitted" (RFC 4918, 10.4.1).
pub(crate) fn submitted_tokens(conds: &[IfCondition]) -> Vec<String> {
    let mut tokens = Vec::new();
    for t in conds.iter().flat_map(|c| &c.tokens) {
        if t.must_match && !tokens.contains(&t.value) {
            tokens.push(t.value.clone());
        }
    }
    tokens
}

impl DavInner {
    /// Evaluate `If` header branches against `target` (the request's
    /// resource, or the destination of a COPY/MOVE).
    ///
    /// Returns `true` if there are no branches, or if one branch holds.
    /// A branch naming a resource that cannot be resolved fails the whole
    /// header, not just that branch.
    pub(crate) async fn evaluate_if_headers(&self, target: &ResourceScope, conds: &[IfCondition]) -> DavResult<bool> {
        if conds.is_empty() {
            return Ok(true);
        }
        // etags by logical path, computed at most once per resource.
        let mut etags: HashMap<String, Option<ETag>> = HashMap::new();

        'lists: for (idx, cond) in conds.iter().enumerate() {
            let resolved;
            let res = match (&cond.path, cond.bad_path) {
                (_, true) => {
                    debug!("If: resource tag of list {idx} is outside of {}", self.prefix);
                    return Ok(false);
                }
                (Some(path), _) => match self.resolve(path).await {
                    Some(r) => {
                        resolved = r;
                        &resolved
                    }
                    None => {
                        debug!("If: resource {path} of list {idx} does not resolve");
                        return Ok(false);
                    }
                },
                (None, _) => target,
            };

            if !cond.have_lock.is_empty() {
                let locked = self.lm.is_resource_locked(&res.lock_target()).await?;
                if cond.have_lock.iter().any(|m| m.must_match != locked) {
                    debug!("If: list {idx}: lock state mismatch on {}", res.db_file_path);
                    continue 'lists;
                }
            }

            for m in &cond.tokens {
                let found = self.lm.is_locked_with_token(&m.value, &res.db_file_path).await?;
                let ok = found.is_some_and(|l| l.space.same_scope(&res.space));
                if ok != m.must_match {
                    debug!("If: list {idx}: token {} mismatch on {}", m.value, res.db_file_path);
                    continue 'lists;
                }
            }

            for m in &cond.etags {
                if !etags.contains_key(&res.db_file_path) {
                    let etag = match self.fs.metadata(&res.fs_path).await {
                        Ok(meta) => ETag::new(true, meta.etag()).ok(),
                        Err(_) => None,
                    };
                    etags.insert(res.db_file_path.clone(), etag);
                }
                let ok = etags
                    .get(&res.db_file_path)
                    .and_then(|e| e.as_ref())
                    .is_some_and(|e| e.weak_eq(&m.value));
                if ok != m.must_match {
                    debug!("If: list {idx}: etag {} mismatch on {}", m.value, res.db_file_path);
                    continue 'lists;
                }
            }

            return Ok(true);
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use headers::Header;
    use http::HeaderValue;

    fn parse(s: &'static str, prefix: &str) -> Vec<IfCondition> {
        let v = HeaderValue::from_static(s);
        let hdr = davheaders::If::decode(&mut std::iter::once(&v)).unwrap();
        if_conditions(&hdr, prefix)
    }

    #[test]
    fn conditions_from_header() {
        let c = parse(r#"(<urn:uuid:1> ["abc"] Not <urn:uuid:2> ["def"]) (Not <DAV:no-lock>)"#, "");
        assert_eq!(c.len(), 2);
        let tokens: Vec<_> = c[0].tokens.iter().map(|m| (m.must_match, m.value.as_str())).collect();
        assert_eq!(tokens, vec![(true, "urn:uuid:1"), (false, "urn:uuid:2")]);
        let etags: Vec<_> = c[0].etags.iter().map(|m| m.value.to_string()).collect();
        assert_eq!(etags, vec![r#""abc""#, r#""def""#]);
        assert!(c[0].have_lock.is_empty());
        assert_eq!(c[1].have_lock, vec![Match { must_match: true, value: () }]);
        assert!(c[1].tokens.is_empty());
    }

    #[test]
    fn resource_tags() {
        let c = parse(r#"<http://h/dav/a> (<urn:uuid:1>) <http://h/other/a> (<urn:uuid:2>)"#, "/dav");
        assert_eq!(c[0].path.as_ref().map(|p| p.as_bytes().to_vec()), Some(b"/a".to_vec()));
        assert!(!c[0].bad_path);
        assert!(c[1].bad_path);
    }

    #[test]
    fn tokens() {
        let c = parse(r#"(<urn:uuid:1>) (Not <urn:uuid:2>) (<urn:uuid:1>) (<DAV:no-lock>)"#, "");
        assert_eq!(submitted_tokens(&c), vec!["urn:uuid:1"]);
    }
}
