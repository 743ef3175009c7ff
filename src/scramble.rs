//! Scramble enumeration.
//!
//! A scramble is one concrete choice of a single checkpoint per group,
//! paired with the forbidden-region set that choice induces. The full
//! cartesian product over group members is walked lazily; groups iterate in
//! ascending id order and members in input order, with the last group
//! varying fastest. The first emitted entry is the unconstrained
//! all-checkpoints tour that primes the route cache.

use std::fmt;

use crate::checkpoints::{Checkpoint, Coordinate};

/// Which regions become forbidden for a scramble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NogoPolicy {
    /// Forbid the regions of the checkpoints that were selected.
    #[default]
    Selected,
    /// Forbid the regions of the group members that were left out.
    Complement,
}

/// One concrete checkpoint selection: the ordered coordinate list (start
/// first, destination last) and the region codes the tour must avoid.
#[derive(Debug, Clone, PartialEq)]
pub struct Scramble {
    pub coordinates: Vec<Coordinate>,
    pub nogos: Vec<String>,
}

#[derive(Debug)]
pub enum ScrambleError {
    /// The start or sink group has no member.
    MissingGroup(String),
    /// The start or sink group has more than one member.
    AmbiguousGroup(String),
}

impl fmt::Display for ScrambleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScrambleError::MissingGroup(g) => write!(f, "no checkpoint in group {}", g),
            ScrambleError::AmbiguousGroup(g) => {
                write!(f, "group {} must have exactly one checkpoint", g)
            }
        }
    }
}

impl std::error::Error for ScrambleError {}

#[derive(Debug, Clone)]
struct Member {
    coord: Coordinate,
    code: String,
}

pub struct Scrambler {
    start: Coordinate,
    end: Coordinate,
    /// Intermediate groups in ascending id order, members in input order.
    groups: Vec<Vec<Member>>,
    policy: NogoPolicy,
}

impl Scrambler {
    pub fn new(
        checkpoints: &[Checkpoint],
        start_group: &str,
        sink_group: &str,
        policy: NogoPolicy,
    ) -> Result<Self, ScrambleError> {
        let start = single_member(checkpoints, start_group)?;
        let end = single_member(checkpoints, sink_group)?;

        let mut group_ids: Vec<&str> = Vec::new();
        for checkpoint in checkpoints {
            let id = checkpoint.group.as_str();
            if id != start_group && id != sink_group && !group_ids.contains(&id) {
                group_ids.push(id);
            }
        }
        // ascending id, numeric when possible
        group_ids.sort_by(|a, b| match (a.parse::<u64>(), b.parse::<u64>()) {
            (Ok(x), Ok(y)) => x.cmp(&y),
            (Ok(_), Err(_)) => std::cmp::Ordering::Less,
            (Err(_), Ok(_)) => std::cmp::Ordering::Greater,
            (Err(_), Err(_)) => a.cmp(b),
        });

        let groups = group_ids
            .iter()
            .map(|&id| {
                checkpoints
                    .iter()
                    .filter(|c| c.group == id)
                    .map(|c| Member {
                        coord: c.coord,
                        code: c.code.clone(),
                    })
                    .collect()
            })
            .collect();

        Ok(Self {
            start,
            end,
            groups,
            policy,
        })
    }

    /// Lazy walk over the unconstrained prime entry followed by every
    /// checkpoint selection.
    pub fn scrambles(&self) -> Scrambles<'_> {
        Scrambles {
            scrambler: self,
            primed: false,
            indices: if self.groups.is_empty() {
                None
            } else {
                Some(vec![0; self.groups.len()])
            },
        }
    }

    /// Start + every group member + end, with no forbidden regions. Warms
    /// the cache with the relaxed routes every later scramble tries to
    /// reuse.
    fn unconstrained(&self) -> Scramble {
        let mut coordinates = vec![self.start];
        for group in &self.groups {
            coordinates.extend(group.iter().map(|m| m.coord));
        }
        coordinates.push(self.end);
        Scramble {
            coordinates,
            nogos: Vec::new(),
        }
    }

    fn scramble_at(&self, indices: &[usize]) -> Scramble {
        let mut coordinates = vec![self.start];
        let mut nogos: Vec<String> = Vec::new();
        for (group, &chosen) in self.groups.iter().zip(indices) {
            coordinates.push(group[chosen].coord);
            match self.policy {
                NogoPolicy::Selected => push_unique(&mut nogos, &group[chosen].code),
                NogoPolicy::Complement => {
                    for (idx, member) in group.iter().enumerate() {
                        if idx != chosen {
                            push_unique(&mut nogos, &member.code);
                        }
                    }
                }
            }
        }
        coordinates.push(self.end);
        Scramble { coordinates, nogos }
    }
}

fn single_member(checkpoints: &[Checkpoint], group: &str) -> Result<Coordinate, ScrambleError> {
    let mut members = checkpoints.iter().filter(|c| c.group == group);
    let first = members
        .next()
        .ok_or_else(|| ScrambleError::MissingGroup(group.to_owned()))?;
    if members.next().is_some() {
        return Err(ScrambleError::AmbiguousGroup(group.to_owned()));
    }
    Ok(first.coord)
}

fn push_unique(nogos: &mut Vec<String>, code: &str) {
    if !nogos.iter().any(|c| c == code) {
        nogos.push(code.to_owned());
    }
}

pub struct Scrambles<'a> {
    scrambler: &'a Scrambler,
    primed: bool,
    indices: Option<Vec<usize>>,
}

impl Iterator for Scrambles<'_> {
    type Item = Scramble;

    fn next(&mut self) -> Option<Scramble> {
        if !self.primed {
            self.primed = true;
            return Some(self.scrambler.unconstrained());
        }

        let indices = self.indices.clone()?;
        let scramble = self.scrambler.scramble_at(&indices);

        // advance mixed-radix counter, last group fastest
        let mut next = indices;
        let mut pos = next.len();
        let mut exhausted = true;
        while pos > 0 {
            pos -= 1;
            next[pos] += 1;
            if next[pos] < self.scrambler.groups[pos].len() {
                exhausted = false;
                break;
            }
            next[pos] = 0;
        }
        self.indices = if exhausted { None } else { Some(next) };

        Some(scramble)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkpoint(lon: f64, lat: f64, group: &str, code: &str) -> Checkpoint {
        Checkpoint {
            coord: Coordinate::new(lon, lat),
            group: group.to_owned(),
            code: code.to_owned(),
            label: code.to_owned(),
            station: None,
        }
    }

    /// Start, sink and two groups of two members each.
    fn two_by_two() -> Vec<Checkpoint> {
        vec![
            checkpoint(7.0, 47.3, "8", "CH-JU"),
            checkpoint(7.4, 46.9, "0", "CH-BE"),
            checkpoint(8.5, 47.4, "1", "CH-ZH"),
            checkpoint(6.6, 46.5, "1", "CH-VD"),
            checkpoint(7.6, 46.2, "2", "CH-VS"),
            checkpoint(9.4, 47.0, "2", "CH-GR"),
        ]
    }

    #[test]
    fn test_emits_prime_plus_full_product() {
        let scrambler = Scrambler::new(&two_by_two(), "8", "0", NogoPolicy::Selected).unwrap();
        let scrambles: Vec<Scramble> = scrambler.scrambles().collect();
        assert_eq!(scrambles.len(), 1 + 4);

        let prime = &scrambles[0];
        assert!(prime.nogos.is_empty());
        assert_eq!(prime.coordinates.len(), 6);
        assert_eq!(prime.coordinates[0], Coordinate::new(7.0, 47.3));
        assert_eq!(prime.coordinates[5], Coordinate::new(7.4, 46.9));

        for scramble in &scrambles[1..] {
            assert_eq!(scramble.coordinates.len(), 4);
            assert_eq!(scramble.coordinates[0], Coordinate::new(7.0, 47.3));
            assert_eq!(scramble.coordinates[3], Coordinate::new(7.4, 46.9));
        }
    }

    #[test]
    fn test_last_group_varies_fastest() {
        let scrambler = Scrambler::new(&two_by_two(), "8", "0", NogoPolicy::Selected).unwrap();
        let picks: Vec<Vec<String>> = scrambler
            .scrambles()
            .skip(1)
            .map(|s| s.nogos)
            .collect();
        assert_eq!(
            picks,
            vec![
                vec!["CH-ZH".to_owned(), "CH-VS".to_owned()],
                vec!["CH-ZH".to_owned(), "CH-GR".to_owned()],
                vec!["CH-VD".to_owned(), "CH-VS".to_owned()],
                vec!["CH-VD".to_owned(), "CH-GR".to_owned()],
            ]
        );
    }

    #[test]
    fn test_complement_policy_flips_the_nogo_set() {
        let scrambler = Scrambler::new(&two_by_two(), "8", "0", NogoPolicy::Complement).unwrap();
        let first = scrambler.scrambles().nth(1).unwrap();
        // first scramble selects CH-ZH and CH-VS, so the left-out members
        // become the nogos
        assert_eq!(first.nogos, vec!["CH-VD".to_owned(), "CH-GR".to_owned()]);
    }

    #[test]
    fn test_nogos_are_deduplicated() {
        let mut checkpoints = two_by_two();
        // both members of group 2 sit in the canton selected from group 1
        checkpoints[4].code = "CH-ZH".to_owned();
        let scrambler = Scrambler::new(&checkpoints, "8", "0", NogoPolicy::Selected).unwrap();
        let first = scrambler.scrambles().nth(1).unwrap();
        assert_eq!(first.nogos, vec!["CH-ZH".to_owned()]);
    }

    #[test]
    fn test_groups_sorted_numerically() {
        let checkpoints = vec![
            checkpoint(7.0, 47.3, "8", "CH-JU"),
            checkpoint(7.4, 46.9, "0", "CH-BE"),
            checkpoint(9.4, 47.0, "10", "CH-GR"),
            checkpoint(8.5, 47.4, "2", "CH-ZH"),
        ];
        let scrambler = Scrambler::new(&checkpoints, "8", "0", NogoPolicy::Selected).unwrap();
        let first = scrambler.scrambles().nth(1).unwrap();
        assert_eq!(first.nogos, vec!["CH-ZH".to_owned(), "CH-GR".to_owned()]);
    }

    #[test]
    fn test_missing_start_group_is_an_error() {
        let checkpoints = vec![checkpoint(7.4, 46.9, "0", "CH-BE")];
        assert!(matches!(
            Scrambler::new(&checkpoints, "8", "0", NogoPolicy::Selected),
            Err(ScrambleError::MissingGroup(_))
        ));
    }

    #[test]
    fn test_ambiguous_sink_group_is_an_error() {
        let checkpoints = vec![
            checkpoint(7.0, 47.3, "8", "CH-JU"),
            checkpoint(7.4, 46.9, "0", "CH-BE"),
            checkpoint(7.5, 46.8, "0", "CH-BE"),
        ];
        assert!(matches!(
            Scrambler::new(&checkpoints, "8", "0", NogoPolicy::Selected),
            Err(ScrambleError::AmbiguousGroup(_))
        ));
    }

    #[test]
    fn test_no_intermediate_groups_yields_only_the_prime() {
        let checkpoints = vec![
            checkpoint(7.0, 47.3, "8", "CH-JU"),
            checkpoint(7.4, 46.9, "0", "CH-BE"),
        ];
        let scrambler = Scrambler::new(&checkpoints, "8", "0", NogoPolicy::Selected).unwrap();
        let scrambles: Vec<Scramble> = scrambler.scrambles().collect();
        assert_eq!(scrambles.len(), 1);
        assert_eq!(scrambles[0].coordinates.len(), 2);
    }
}
