use std::collections::VecDeque;

use crate::navigator::{ObjectNavigator, RefLabel};
use crate::parse::ParsedDump;
use crate::progress::{Outcome, Progress};
use crate::remap::IdRemapper;
use crate::storage::{IntList, SlotWidth, StorageBacking};
use crate::types::{DenseId, HeapDumpError, Result};

const CANCEL_POLL_INTERVAL: usize = 1024;

/// Owner-reference positions beyond one byte are clamped; the report falls
/// back to matching the child among the parent's references.
const OWNER_REF_CLAMP: u32 = u8::MAX as u32;

/// Per-object traversal state: parallel fixed-width lists indexed by dense
/// id, created fresh per analysis run and discarded with it. Every list
/// goes through the storage backing, so a file-backed run holds none of
/// them in memory. Parents form the spanning forest of the breadth-first
/// walk; "first discoverer wins", which is a heuristic, not a
/// minimal-dominator guarantee.
pub struct Traversal {
    parent: Box<dyn IntList>,
    owner_ref_index: Box<dyn IntList>,
    subtree_size: Box<dyn IntList>,
    visited: Box<dyn IntList>,
    bfs_order: Box<dyn IntList>,
    visited_count: usize,
}

impl Traversal {
    pub fn is_visited(&self, dense: DenseId) -> Result<bool> {
        Ok(self.visited.get(dense as usize)? != 0)
    }

    /// None for roots and for objects the walk never reached.
    pub fn parent_of(&self, dense: DenseId) -> Result<Option<DenseId>> {
        Ok(match self.parent.get(dense as usize)? {
            0 => None,
            stored => Some((stored - 1) as DenseId),
        })
    }

    pub fn owner_ref_index(&self, dense: DenseId) -> Result<u32> {
        Ok(self.owner_ref_index.get(dense as usize)? as u32)
    }

    /// Cumulative shallow size of the object's spanning-forest subtree,
    /// saturating at the 4-byte slot width.
    pub fn subtree_size(&self, dense: DenseId) -> Result<u32> {
        Ok(self.subtree_size.get(dense as usize)? as u32)
    }

    pub fn visited_count(&self) -> usize {
        self.visited_count
    }

    /// The dense id discovered at `index` of the breadth-first walk, for
    /// `index < visited_count()`.
    pub fn bfs_at(&self, index: usize) -> Result<DenseId> {
        Ok(self.bfs_order.get(index)? as DenseId)
    }

    /// The discovery path from a root down to `dense`, inclusive.
    pub fn path_from_root(&self, dense: DenseId) -> Result<Vec<DenseId>> {
        let mut path = vec![dense];
        let mut current = dense;
        while let Some(parent) = self.parent_of(current)? {
            path.push(parent);
            current = parent;
        }
        path.reverse();
        Ok(path)
    }
}

/// Breadth-first traversal from the GC roots over the remapped graph.
pub struct GraphAnalyzer<'a> {
    navigator: &'a ObjectNavigator<'a>,
    dump: &'a ParsedDump,
    remapper: &'a IdRemapper,
    backing: StorageBacking,
}

impl<'a> GraphAnalyzer<'a> {
    pub fn new(
        navigator: &'a ObjectNavigator<'a>,
        dump: &'a ParsedDump,
        remapper: &'a IdRemapper,
        backing: StorageBacking,
    ) -> Self {
        Self {
            navigator,
            dump,
            remapper,
            backing,
        }
    }

    pub fn traverse(&self, progress: &dyn Progress) -> Result<Outcome<Traversal>> {
        let n = self.navigator.object_count();
        let mut state = Traversal {
            parent: self.backing.new_list(SlotWidth::Four, n)?,
            owner_ref_index: self.backing.new_list(SlotWidth::One, n)?,
            subtree_size: self.backing.new_list(SlotWidth::Four, n)?,
            visited: self.backing.new_list(SlotWidth::One, n)?,
            bfs_order: self.backing.new_list(SlotWidth::Four, n)?,
            visited_count: 0,
        };

        progress.phase("traversing from GC roots");
        let mut queue: VecDeque<DenseId> = VecDeque::new();

        // Root seeding. The same object may be rooted several times; it is
        // seeded once.
        for root in &self.dump.roots {
            let dense = self.remapper.dense_of(root.object_id)?.ok_or_else(|| {
                HeapDumpError::inconsistent(root.object_id, "GC root is not in the dump")
            })?;
            if state.is_visited(dense)? {
                continue;
            }
            state.visited.set(dense as usize, 1)?;
            state.parent.set(dense as usize, 0)?;
            self.store_size(&mut state, dense)?;
            state.bfs_order.set(state.visited_count, dense as u64)?;
            state.visited_count += 1;
            queue.push_back(dense);
        }

        let mut processed = 0usize;
        while let Some(current) = queue.pop_front() {
            for (position, reference) in self.navigator.references_of(current)?.iter().enumerate()
            {
                let child = reference.target;
                if state.is_visited(child)? {
                    continue;
                }
                state.visited.set(child as usize, 1)?;
                state.parent.set(child as usize, current as u64 + 1)?;
                state
                    .owner_ref_index
                    .set(child as usize, (position as u64).min(OWNER_REF_CLAMP as u64))?;
                self.store_size(&mut state, child)?;
                state.bfs_order.set(state.visited_count, child as u64)?;
                state.visited_count += 1;
                queue.push_back(child);
            }

            processed += 1;
            if processed % CANCEL_POLL_INTERVAL == 0 && progress.is_cancelled() {
                return Ok(Outcome::Cancelled);
            }
        }

        progress.phase("accumulating subtree sizes");
        // Children appear after their parent in BFS order, so one reverse
        // pass settles every subtree before it is added to its parent.
        for index in (0..state.visited_count).rev() {
            let dense = state.bfs_at(index)?;
            if let Some(parent) = state.parent_of(dense)? {
                let sum = (state.subtree_size.get(parent as usize)?
                    + state.subtree_size.get(dense as usize)?)
                .min(u32::MAX as u64);
                state.subtree_size.set(parent as usize, sum)?;
            }
            if index % CANCEL_POLL_INTERVAL == 0 && progress.is_cancelled() {
                return Ok(Outcome::Cancelled);
            }
        }

        Ok(Outcome::Completed(state))
    }

    /// Resolves the label of the reference that first discovered `child`
    /// from `parent`. The stored one-byte index is authoritative when it
    /// was not clamped; otherwise the child is matched among the parent's
    /// references.
    pub fn owner_label(
        &self,
        traversal: &Traversal,
        parent: DenseId,
        child: DenseId,
    ) -> Result<Option<RefLabel>> {
        let references = self.navigator.references_of(parent)?;
        let stored = traversal.owner_ref_index(child)?;
        if stored < OWNER_REF_CLAMP {
            if let Some(reference) = references.get(stored as usize) {
                if reference.target == child {
                    return Ok(Some(reference.label.clone()));
                }
            }
        }
        Ok(references
            .into_iter()
            .find(|r| r.target == child)
            .map(|r| r.label))
    }

    fn store_size(&self, state: &mut Traversal, dense: DenseId) -> Result<()> {
        let shallow = self.navigator.shallow_size(dense)?;
        state
            .subtree_size
            .set(dense as usize, shallow.min(u32::MAX as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{ClassMirror, DumpBuilder, Obj, Value};
    use crate::format::IdSize;
    use crate::parse::{DumpParser, MemoryPayloads, ParsedDump};
    use crate::progress::{CancelFlag, Silent};
    use crate::types::FieldType;
    use std::io::Write as _;
    use std::rc::Rc;

    fn parse(bytes: &[u8]) -> ParsedDump {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(bytes).unwrap();
        tmp.flush().unwrap();
        DumpParser::open(tmp.path())
            .unwrap()
            .scan(&Silent)
            .unwrap()
            .completed()
            .unwrap()
    }

    /// Root -> a -> c, Root -> b, plus unreachable orphan. Diamond edge
    /// b -> c exercises first-discoverer parents.
    fn build_fixture() -> Vec<u8> {
        let class = ClassMirror::new(
            "Node",
            &[("left", FieldType::Object), ("right", FieldType::Object)],
        );
        let root = Obj::instance(&class);
        let a = Obj::instance(&class);
        let b = Obj::instance(&class);
        let c = Obj::instance(&class);
        let orphan = Obj::instance(&class);

        root.set_field("left", Value::Ref(Some(Rc::clone(&a))));
        root.set_field("right", Value::Ref(Some(Rc::clone(&b))));
        a.set_field("left", Value::Ref(Some(Rc::clone(&c))));
        b.set_field("left", Value::Ref(Some(Rc::clone(&c))));

        let mut builder = DumpBuilder::new(Vec::new(), IdSize::Eight, 0).unwrap();
        builder.add_root_unknown(&root).unwrap();
        builder.add_object(Some(&orphan)).unwrap();
        builder.finish().unwrap()
    }

    fn bfs_vec(traversal: &Traversal) -> Vec<DenseId> {
        (0..traversal.visited_count())
            .map(|index| traversal.bfs_at(index).unwrap())
            .collect()
    }

    fn with_traversal(bytes: &[u8], check: impl FnOnce(&ObjectNavigator<'_>, &Traversal)) {
        let dump = parse(bytes);
        let remapper = IdRemapper::build(&dump.objects, &StorageBacking::Memory).unwrap();
        let nav = ObjectNavigator::new(
            &dump,
            &remapper,
            Box::new(MemoryPayloads::from_bytes(bytes.to_vec())),
        );
        let analyzer = GraphAnalyzer::new(&nav, &dump, &remapper, StorageBacking::Memory);
        let traversal = analyzer.traverse(&Silent).unwrap().completed().unwrap();
        check(&nav, &traversal);
    }

    #[test]
    fn test_spanning_forest_parents() {
        let bytes = build_fixture();
        with_traversal(&bytes, |_nav, traversal| {
            // Record emission is depth-first, children before parents, so
            // dense ids are c=0, a=1, b=2, root=3, orphan=4.
            assert_eq!(traversal.parent_of(3).unwrap(), None);
            assert_eq!(traversal.parent_of(1).unwrap(), Some(3));
            assert_eq!(traversal.parent_of(2).unwrap(), Some(3));
            // c is discovered from a (BFS dequeues a before b).
            assert_eq!(traversal.parent_of(0).unwrap(), Some(1));

            assert!(!traversal.is_visited(4).unwrap());
            assert_eq!(traversal.visited_count(), 4);
            assert_eq!(bfs_vec(traversal), vec![3, 1, 2, 0]);
        });
    }

    #[test]
    fn test_subtree_sizes() {
        let bytes = build_fixture();
        with_traversal(&bytes, |_nav, traversal| {
            // Every Node is 16 bytes shallow (two 8-byte refs).
            assert_eq!(traversal.subtree_size(0).unwrap(), 16); // c
            assert_eq!(traversal.subtree_size(1).unwrap(), 32); // a + c
            assert_eq!(traversal.subtree_size(2).unwrap(), 16); // b (c counted under a)
            assert_eq!(traversal.subtree_size(3).unwrap(), 64); // whole reachable set
        });
    }

    #[test]
    fn test_path_from_root() {
        let bytes = build_fixture();
        with_traversal(&bytes, |_nav, traversal| {
            assert_eq!(traversal.path_from_root(0).unwrap(), vec![3, 1, 0]);
            assert_eq!(traversal.path_from_root(3).unwrap(), vec![3]);
        });
    }

    #[test]
    fn test_cycle_terminates() {
        let class = ClassMirror::new("Selfish", &[("me", FieldType::Object)]);
        let obj = Obj::instance(&class);
        obj.set_field("me", Value::Ref(Some(Rc::clone(&obj))));

        let mut builder = DumpBuilder::new(Vec::new(), IdSize::Eight, 0).unwrap();
        builder.add_root_unknown(&obj).unwrap();
        let bytes = builder.finish().unwrap();

        with_traversal(&bytes, |_nav, traversal| {
            assert_eq!(traversal.visited_count(), 1);
            assert_eq!(traversal.subtree_size(0).unwrap(), 8);
        });
    }

    #[test]
    fn test_file_backed_traversal_matches_memory() {
        let bytes = build_fixture();
        let dump = parse(&bytes);
        let remapper = IdRemapper::build(&dump.objects, &StorageBacking::Memory).unwrap();
        let nav = ObjectNavigator::new(
            &dump,
            &remapper,
            Box::new(MemoryPayloads::from_bytes(bytes.clone())),
        );

        let mem = GraphAnalyzer::new(&nav, &dump, &remapper, StorageBacking::Memory)
            .traverse(&Silent)
            .unwrap()
            .completed()
            .unwrap();
        let file = GraphAnalyzer::new(&nav, &dump, &remapper, StorageBacking::File)
            .traverse(&Silent)
            .unwrap()
            .completed()
            .unwrap();

        assert_eq!(bfs_vec(&mem), bfs_vec(&file));
        for dense in 0..nav.object_count() as DenseId {
            assert_eq!(
                mem.parent_of(dense).unwrap(),
                file.parent_of(dense).unwrap()
            );
            assert_eq!(
                mem.subtree_size(dense).unwrap(),
                file.subtree_size(dense).unwrap()
            );
        }
    }

    #[test]
    fn test_pre_cancelled_traversal() {
        // A chain long enough to cross the poll interval.
        let class = ClassMirror::new("Link", &[("next", FieldType::Object)]);
        let head = Obj::instance(&class);
        let mut tail = Rc::clone(&head);
        for _ in 0..2 * CANCEL_POLL_INTERVAL {
            let next = Obj::instance(&class);
            tail.set_field("next", Value::Ref(Some(Rc::clone(&next))));
            tail = next;
        }

        let mut builder = DumpBuilder::new(Vec::new(), IdSize::Eight, 0).unwrap();
        builder.add_root_unknown(&head).unwrap();
        let bytes = builder.finish().unwrap();

        let dump = parse(&bytes);
        let remapper = IdRemapper::build(&dump.objects, &StorageBacking::Memory).unwrap();
        let nav = ObjectNavigator::new(
            &dump,
            &remapper,
            Box::new(MemoryPayloads::from_bytes(bytes)),
        );

        let flag = CancelFlag::new();
        flag.cancel();
        let outcome = GraphAnalyzer::new(&nav, &dump, &remapper, StorageBacking::Memory)
            .traverse(&flag)
            .unwrap();
        assert!(outcome.is_cancelled());
    }
}
