use crate::analysis::histogram::Histogram;

/// Picks the classes whose instances get detailed path reporting.
///
/// With an explicit list the caller's order is kept as-is. Otherwise the
/// top `top_k` histogram entries by instance count are nominated; ties keep
/// histogram encounter order (the sort is stable), and entries sharing a
/// display name collapse into one nomination since path reporting is
/// name-addressed. This bounds the reporting workload, it does not promise
/// leak relevance.
pub fn nominate(
    histogram: &Histogram,
    explicit: Option<&[String]>,
    top_k: usize,
) -> Vec<String> {
    match explicit {
        Some(names) => names.to_vec(),
        None => {
            let mut names: Vec<String> = Vec::new();
            for entry in histogram.by_count_desc() {
                if names.len() == top_k {
                    break;
                }
                if !names.iter().any(|name| name == &entry.name) {
                    names.push(entry.name.clone());
                }
            }
            names
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{ClassMirror, DumpBuilder, Obj};
    use crate::format::IdSize;
    use crate::navigator::ObjectNavigator;
    use crate::parse::{DumpParser, MemoryPayloads};
    use crate::progress::Silent;
    use crate::remap::IdRemapper;
    use crate::storage::StorageBacking;
    use std::io::Write as _;

    #[test]
    fn test_top_k_by_count_with_stable_ties() {
        // Three of A, one of B, three of C; A encountered before C.
        let a = ClassMirror::new("A", &[]);
        let b = ClassMirror::new("B", &[]);
        let c = ClassMirror::new("C", &[]);

        let mut builder = DumpBuilder::new(Vec::new(), IdSize::Eight, 0).unwrap();
        for _ in 0..3 {
            builder.add_object(Some(&Obj::instance(&a))).unwrap();
        }
        builder.add_object(Some(&Obj::instance(&b))).unwrap();
        for _ in 0..3 {
            builder.add_object(Some(&Obj::instance(&c))).unwrap();
        }
        let bytes = builder.finish().unwrap();

        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&bytes).unwrap();
        tmp.flush().unwrap();

        let dump = DumpParser::open(tmp.path())
            .unwrap()
            .scan(&Silent)
            .unwrap()
            .completed()
            .unwrap();
        let remapper = IdRemapper::build(&dump.objects, &StorageBacking::Memory).unwrap();
        let nav = ObjectNavigator::new(
            &dump,
            &remapper,
            Box::new(MemoryPayloads::from_bytes(bytes)),
        );
        let histogram = crate::analysis::Histogram::compute(&nav, &Silent)
            .unwrap()
            .completed()
            .unwrap();

        assert_eq!(nominate(&histogram, None, 2), vec!["A", "C"]);
        assert_eq!(nominate(&histogram, None, 10), vec!["A", "C", "B"]);

        let explicit = vec!["B".to_string(), "Missing".to_string()];
        assert_eq!(
            nominate(&histogram, Some(&explicit), 2),
            vec!["B", "Missing"]
        );
    }
}
