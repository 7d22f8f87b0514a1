//! Linux cpulist parsing (`0-3,5,7-8`), as found in
//! `/sys/devices/system/cpu/online`.
use nom::character::complete::{char, digit1};
use nom::combinator::{map_res, opt};
use nom::multi::separated_list1;
use nom::sequence::preceded;
use nom::IResult;
use nom::Parser;
use std::collections::BTreeSet;
use std::fs;
use std::io::{Error, ErrorKind, Result};

pub const ONLINE_CPUS: &str = "/sys/devices/system/cpu/online";

/// A set of processing-unit ids.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CpuSet {
    cpus: BTreeSet<usize>,
}

impl CpuSet {
    pub fn parse(input: &str) -> Result<Self> {
        let ranges = map_result(parse_cpu_list(input.trim()))?;
        let mut cpus = BTreeSet::new();
        for (lo, hi) in ranges {
            if hi < lo {
                return Err(Error::new(
                    ErrorKind::InvalidInput,
                    format!("descending cpu range {}-{}", lo, hi),
                ));
            }
            cpus.extend(lo..=hi);
        }
        Ok(CpuSet { cpus })
    }

    pub fn online() -> Result<Self> {
        Self::parse(&fs::read_to_string(ONLINE_CPUS)?)
    }

    pub fn contains(&self, cpu: usize) -> bool {
        self.cpus.contains(&cpu)
    }

    pub fn len(&self) -> usize {
        self.cpus.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cpus.is_empty()
    }

    pub fn intersection(&self, other: &CpuSet) -> CpuSet {
        CpuSet {
            cpus: self.cpus.intersection(&other.cpus).copied().collect(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.cpus.iter().copied()
    }
}

impl FromIterator<usize> for CpuSet {
    fn from_iter<T: IntoIterator<Item = usize>>(iter: T) -> Self {
        CpuSet {
            cpus: iter.into_iter().collect(),
        }
    }
}

pub fn map_result<T>(result: IResult<&str, T>) -> Result<T> {
    match result {
        IResult::Ok((remaining, val)) => {
            if remaining.is_empty() {
                Result::Ok(val)
            } else {
                Result::Err(Error::new(
                    ErrorKind::InvalidInput,
                    format!("unable to parse whole input, remaining: {:?}", remaining),
                ))
            }
        }
        IResult::Err(err) => Result::Err(Error::new(
            ErrorKind::InvalidInput,
            format!("unable to parse input: {:?}", err),
        )),
    }
}

fn parse_usize(input: &str) -> IResult<&str, usize> {
    map_res(digit1, |s: &str| s.parse::<usize>()).parse(input)
}

fn parse_range(input: &str) -> IResult<&str, (usize, usize)> {
    (parse_usize, opt(preceded(char('-'), parse_usize)))
        .parse(input)
        .map(|(next_input, (lo, hi))| (next_input, (lo, hi.unwrap_or(lo))))
}

fn parse_cpu_list(input: &str) -> IResult<&str, Vec<(usize, usize)>> {
    separated_list1(char(','), parse_range).parse(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ranges_and_singles() {
        let set = CpuSet::parse("0-3,5,7-8\n").unwrap();
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![0, 1, 2, 3, 5, 7, 8]);
        assert!(set.contains(5));
        assert!(!set.contains(6));
    }

    #[test]
    fn single_cpu() {
        let set = CpuSet::parse("0").unwrap();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn rejects_garbage() {
        assert!(CpuSet::parse("").is_err());
        assert!(CpuSet::parse("0-3,x").is_err());
        assert!(CpuSet::parse("4-2").is_err());
    }

    #[test]
    fn intersects() {
        let a = CpuSet::parse("0-7").unwrap();
        let b: CpuSet = [2, 3, 9].into_iter().collect();
        assert_eq!(a.intersection(&b).iter().collect::<Vec<_>>(), vec![2, 3]);
    }
}
