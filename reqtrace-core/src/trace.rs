//! Trace classification engine
//!
//! Maps an origin node's category code and the codes of its trace
//! partners onto named relations. The lattice is fixed; classification
//! is an exhaustive match over (origin, partner) pairs, so at most one
//! relation can fire for any pair.

use std::collections::BTreeMap;
use std::fmt;

use crate::models::{Category, Level, ReqKind};

/// Short code of a category as used by the lattice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CategoryCode {
    /// {U,S,A,D}{FR,NFR,DC}
    Req(Level, ReqKind),
    /// UT, ST, AT, DT
    Test(Level),
    /// Structural categories and unresolved (dangling) partners
    Unknown,
}

impl CategoryCode {
    pub fn of(category: Category) -> CategoryCode {
        match category {
            Category::Requirement(level, kind) => CategoryCode::Req(level, kind),
            Category::Test(level) => CategoryCode::Test(level),
            _ => CategoryCode::Unknown,
        }
    }

    /// Code of a partner that may not have resolved
    pub fn of_partner(category: Option<Category>) -> CategoryCode {
        category.map(CategoryCode::of).unwrap_or(CategoryCode::Unknown)
    }

    pub fn level(&self) -> Option<Level> {
        match self {
            CategoryCode::Req(level, _) | CategoryCode::Test(level) => Some(*level),
            CategoryCode::Unknown => None,
        }
    }
}

impl fmt::Display for CategoryCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CategoryCode::Req(level, kind) => {
                write!(f, "{}", Category::Requirement(*level, *kind).code())
            }
            CategoryCode::Test(level) => write!(f, "{}", Category::Test(*level).code()),
            CategoryCode::Unknown => write!(f, "?"),
        }
    }
}

/// A named trace relation, read from the origin's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Relation {
    DecomposedFrom,
    DecomposesTo,
    SatisfiedBy,
    Satisfies,
    DetailedBy,
    Details,
    VerifiedBy,
    Verifies,
}

impl Relation {
    pub fn all() -> &'static [Relation] {
        &[
            Relation::DecomposedFrom,
            Relation::DecomposesTo,
            Relation::SatisfiedBy,
            Relation::Satisfies,
            Relation::DetailedBy,
            Relation::Details,
            Relation::VerifiedBy,
            Relation::Verifies,
        ]
    }

    pub fn label(&self) -> &'static str {
        match self {
            Relation::DecomposedFrom => "Decomposed from",
            Relation::DecomposesTo => "Decomposes to",
            Relation::SatisfiedBy => "Satisfied by",
            Relation::Satisfies => "Satisfies",
            Relation::DetailedBy => "Detailed by",
            Relation::Details => "Details",
            Relation::VerifiedBy => "Verified by",
            Relation::Verifies => "Verifies",
        }
    }

    /// The relation seen from the partner's side
    pub fn inverse(&self) -> Relation {
        match self {
            Relation::DecomposedFrom => Relation::DecomposesTo,
            Relation::DecomposesTo => Relation::DecomposedFrom,
            Relation::SatisfiedBy => Relation::Satisfies,
            Relation::Satisfies => Relation::SatisfiedBy,
            Relation::DetailedBy => Relation::Details,
            Relation::Details => Relation::DetailedBy,
            Relation::VerifiedBy => Relation::Verifies,
            Relation::Verifies => Relation::VerifiedBy,
        }
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Test levels that verify requirements of `level`.
/// Testing levels do not map 1:1 onto requirement levels.
pub fn test_levels_for(level: Level) -> &'static [Level] {
    match level {
        Level::User => &[Level::User],
        Level::Software => &[Level::Software, Level::Architecture],
        Level::Architecture => &[Level::Architecture, Level::Design],
        Level::Design => &[Level::Design, Level::Architecture],
    }
}

/// Requirement levels a test of `test_level` verifies (inverse of [`test_levels_for`])
pub fn requirement_levels_for(test_level: Level) -> Vec<Level> {
    Level::all()
        .iter()
        .copied()
        .filter(|req| test_levels_for(*req).contains(&test_level))
        .collect()
}

fn pairs(req: Level, test: Level) -> bool {
    test_levels_for(req).contains(&test)
}

/// The relation between an origin and a partner code, if any
pub fn relation(origin: CategoryCode, partner: CategoryCode) -> Option<Relation> {
    use CategoryCode::{Req, Test};
    use Level::{Architecture, Design, Software, User};

    match (origin, partner) {
        (Req(Software, _), Req(User, _)) => Some(Relation::DecomposedFrom),
        (Req(User, _), Req(Software, _)) => Some(Relation::DecomposesTo),
        (Req(Software, _), Req(Architecture, _)) => Some(Relation::SatisfiedBy),
        (Req(Architecture, _), Req(Software, _)) => Some(Relation::Satisfies),
        (Req(Software | Architecture, _), Req(Design, _)) => Some(Relation::DetailedBy),
        (Req(Design, _), Req(Software | Architecture, _)) => Some(Relation::Details),
        (Req(req, _), Test(test)) if pairs(req, test) => Some(Relation::VerifiedBy),
        (Test(test), Req(req, _)) if pairs(req, test) => Some(Relation::Verifies),
        _ => None,
    }
}

/// Trace partners grouped by relation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    relations: BTreeMap<Relation, Vec<u64>>,
}

impl Classification {
    /// Partners classified under `relation`, in trace-list order
    pub fn get(&self, relation: Relation) -> &[u64] {
        self.relations
            .get(&relation)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Relation, &[u64])> {
        self.relations.iter().map(|(r, ids)| (*r, ids.as_slice()))
    }

    pub fn into_map(self) -> BTreeMap<Relation, Vec<u64>> {
        self.relations
    }
}

/// Classifies each partner of an origin node. Partners that match no
/// relation, including unresolved ones, are left out.
pub fn classify<I>(origin: CategoryCode, partners: I) -> Classification
where
    I: IntoIterator<Item = (u64, CategoryCode)>,
{
    let mut relations: BTreeMap<Relation, Vec<u64>> = BTreeMap::new();
    for (id, code) in partners {
        if let Some(rel) = relation(origin, code) {
            relations.entry(rel).or_default().push(id);
        }
    }
    Classification { relations }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_codes() -> Vec<CategoryCode> {
        let mut codes = vec![CategoryCode::Unknown];
        for level in Level::all() {
            for kind in ReqKind::all() {
                codes.push(CategoryCode::Req(*level, *kind));
            }
            codes.push(CategoryCode::Test(*level));
        }
        codes
    }

    fn code(s: &str) -> CategoryCode {
        CategoryCode::of(Category::from_code(s).unwrap())
    }

    #[test]
    fn test_spot_checks() {
        assert_eq!(relation(code("SFR"), code("AFR")), Some(Relation::SatisfiedBy));
        assert_eq!(relation(code("AFR"), code("DT")), Some(Relation::VerifiedBy));
        assert_eq!(relation(code("DFR"), code("AT")), Some(Relation::VerifiedBy));
        assert_eq!(relation(code("UFR"), code("UFR")), None);
        assert_eq!(relation(code("SNFR"), code("UDC")), Some(Relation::DecomposedFrom));
        assert_eq!(relation(code("ADC"), code("DNFR")), Some(Relation::DetailedBy));
        assert_eq!(relation(code("DFR"), code("SFR")), Some(Relation::Details));
        assert_eq!(relation(code("UT"), code("UFR")), Some(Relation::Verifies));
        assert_eq!(relation(code("UFR"), code("ST")), None);
        assert_eq!(relation(code("UFR"), code("AFR")), None);
    }

    #[test]
    fn test_relations_are_inverse_symmetric() {
        for origin in all_codes() {
            for partner in all_codes() {
                let forward = relation(origin, partner);
                let backward = relation(partner, origin);
                assert_eq!(forward.map(|r| r.inverse()), backward, "{} -> {}", origin, partner);
            }
        }
    }

    #[test]
    fn test_verification_matches_pairing_table() {
        let table = [
            (Level::User, vec![Level::User]),
            (Level::Software, vec![Level::Software, Level::Architecture]),
            (Level::Architecture, vec![Level::Architecture, Level::Design]),
            (Level::Design, vec![Level::Design, Level::Architecture]),
        ];
        for (req_level, test_levels) in table {
            for kind in ReqKind::all() {
                for test in Level::all() {
                    let expected = test_levels.contains(test).then_some(Relation::VerifiedBy);
                    let got = relation(CategoryCode::Req(req_level, *kind), CategoryCode::Test(*test));
                    assert_eq!(got, expected, "{:?} vs {:?}", req_level, test);
                }
            }
        }
        assert_eq!(
            requirement_levels_for(Level::Architecture),
            vec![Level::Software, Level::Architecture, Level::Design]
        );
        assert_eq!(requirement_levels_for(Level::User), vec![Level::User]);
    }

    #[test]
    fn test_unknown_and_tests_never_pair_with_themselves() {
        for c in all_codes() {
            assert_eq!(relation(CategoryCode::Unknown, c), None);
            assert_eq!(relation(c, CategoryCode::Unknown), None);
        }
        for a in Level::all() {
            for b in Level::all() {
                assert_eq!(relation(CategoryCode::Test(*a), CategoryCode::Test(*b)), None);
            }
        }
    }

    #[test]
    fn test_classify_groups_and_skips_unknown() {
        let result = classify(
            code("SFR"),
            vec![
                (1, code("UFR")),
                (2, code("AFR")),
                (3, CategoryCode::Unknown),
                (4, code("UNFR")),
                (5, code("ST")),
                (6, code("SFR")),
            ],
        );
        assert_eq!(result.get(Relation::DecomposedFrom), &[1, 4]);
        assert_eq!(result.get(Relation::SatisfiedBy), &[2]);
        assert_eq!(result.get(Relation::VerifiedBy), &[5]);
        assert!(result.get(Relation::Details).is_empty());
        assert_eq!(result.iter().count(), 3);
    }

    #[test]
    fn test_origin_without_pattern_yields_nothing() {
        let result = classify(CategoryCode::Unknown, vec![(1, code("UFR")), (2, code("UT"))]);
        assert!(result.is_empty());
    }
}
