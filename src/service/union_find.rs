use crate::models::RecordId;
use std::collections::HashMap;

/// 并查集 (按秩合并 + 路径压缩)
///
/// 不支持删除单个节点；只能整体移除一个连通分量，
/// 因为分量之外的节点不会指向分量内部。
#[derive(Debug, Default, Clone)]
pub struct DisjointSet {
    parent: HashMap<RecordId, RecordId>,
    rank: HashMap<RecordId, u8>,
}

impl DisjointSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn make_set(&mut self, x: RecordId) {
        self.parent.entry(x).or_insert(x);
        self.rank.entry(x).or_insert(0);
    }

    pub fn contains(&self, x: RecordId) -> bool {
        self.parent.contains_key(&x)
    }

    pub fn len(&self) -> usize {
        self.parent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }

    pub fn nodes(&self) -> impl Iterator<Item = RecordId> + '_ {
        self.parent.keys().copied()
    }

    /// 查找根节点；不存在时先建为单点集合
    pub fn find(&mut self, x: RecordId) -> RecordId {
        self.make_set(x);

        let mut root = x;
        while let Some(&p) = self.parent.get(&root) {
            if p == root {
                break;
            }
            root = p;
        }

        // 路径压缩
        let mut current = x;
        while current != root {
            let next = self.parent.get(&current).copied().unwrap_or(root);
            self.parent.insert(current, root);
            current = next;
        }

        root
    }

    /// 合并两个集合，返回新的根
    pub fn union(&mut self, a: RecordId, b: RecordId) -> RecordId {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return ra;
        }

        let rank_a = self.rank.get(&ra).copied().unwrap_or(0);
        let rank_b = self.rank.get(&rb).copied().unwrap_or(0);
        let (root, child) = if rank_a >= rank_b { (ra, rb) } else { (rb, ra) };
        self.parent.insert(child, root);
        if rank_a == rank_b {
            self.rank.insert(root, rank_a.saturating_add(1));
        }
        root
    }

    pub fn same_set(&mut self, a: RecordId, b: RecordId) -> bool {
        self.find(a) == self.find(b)
    }

    /// 移除整个连通分量；调用方必须传入分量的全部成员
    pub fn remove_component<'a>(&mut self, members: impl IntoIterator<Item = &'a RecordId>) {
        for m in members {
            self.parent.remove(m);
            self.rank.remove(m);
        }
    }

    pub fn clear(&mut self) {
        self.parent.clear();
        self.rank.clear();
    }
}
