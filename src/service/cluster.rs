use crate::config::DetectionConfig;
use crate::error::{DedupError, Result};
use crate::models::{
    AuditEntry, Disposition, DuplicateGroup, GroupEvent, GroupFilter, GroupId, GroupPage,
    GroupStatus, MatchField, PairScore, RecordId, Resolution,
};
use crate::service::resolution::{self, ResolutionOutcome};
use crate::service::risk::classify;
use crate::service::union_find::DisjointSet;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// 合格边 (评分 >= 成组阈值)，端点均为锚点记录
#[derive(Debug, Clone)]
struct Edge {
    score: f64,
    matched: BTreeSet<MatchField>,
    links: BTreeSet<GroupId>, // 经由已冻结分组重定向而来时的关联分组
}

/// 聚类索引：并查集 + 边表 + 分组主副本
///
/// 不变量：
/// - 每个大小 >= 2 的并查集分量恰好对应一个 pending 分组，成员即分量节点
/// - 一条记录同一时刻至多属于一个 pending 分组
/// - 已冻结 (merged/ignored) 分组的成员会从并查集中移除，之后只通过锚点重新参与
#[derive(Debug, Default)]
pub struct ClusterIndex {
    forest: DisjointSet,
    edges: HashMap<RecordId, BTreeMap<RecordId, Edge>>,
    pending_by_record: HashMap<RecordId, GroupId>,
    groups: BTreeMap<GroupId, DuplicateGroup>,
    frozen_in: HashMap<RecordId, BTreeSet<GroupId>>,
    superseded_by: HashMap<RecordId, (RecordId, GroupId)>,
    retracted: HashSet<RecordId>,
    audit: HashMap<GroupId, Vec<AuditEntry>>,
    last_group_id: GroupId,
    dirty: BTreeSet<GroupId>,
    events: Vec<GroupEvent>,
}

impl ClusterIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn group(&self, id: GroupId) -> Option<&DuplicateGroup> {
        self.groups.get(&id)
    }

    pub fn pending_group_of(&self, record: RecordId) -> Option<GroupId> {
        self.pending_by_record.get(&record).copied()
    }

    /// 被合并后的最终保留记录
    pub fn superseded_by(&self, record: RecordId) -> Option<RecordId> {
        let (survivor, _) = self.anchor(record);
        (survivor != record).then_some(survivor)
    }

    pub fn audit_log(&self, group: GroupId) -> Vec<AuditEntry> {
        self.audit.get(&group).cloned().unwrap_or_default()
    }

    pub(crate) fn push_audit(&mut self, entry: AuditEntry) {
        self.audit.entry(entry.group_id).or_default().push(entry);
    }

    /// 取出本次操作产生的事件与变更分组
    pub fn drain_changes(&mut self) -> (Vec<DuplicateGroup>, Vec<GroupEvent>) {
        let changed = std::mem::take(&mut self.dirty)
            .into_iter()
            .filter_map(|id| self.groups.get(&id).cloned())
            .collect();
        (changed, std::mem::take(&mut self.events))
    }

    fn next_group_id(&mut self) -> GroupId {
        self.last_group_id += 1;
        self.last_group_id
    }

    /// 锚点：被合并的记录重定向到保留记录 (已撤回的保留记录不再重定向)；
    /// 已冻结分组的成员带上分组关联
    fn anchor(&self, record: RecordId) -> (RecordId, Option<GroupId>) {
        let mut current = record;
        let mut link = None;
        let mut hops = 0;
        while let Some(&(next, group)) = self.superseded_by.get(&current) {
            link = Some(group);
            if self.retracted.contains(&next) {
                break;
            }
            current = next;
            hops += 1;
            if hops > self.superseded_by.len() {
                break;
            }
        }
        if link.is_none() && !self.pending_by_record.contains_key(&current) {
            link = self
                .frozen_in
                .get(&current)
                .and_then(|groups| groups.iter().next_back().copied());
        }
        (current, link)
    }

    /// 两条记录曾在同一冻结分组中被人工处置过
    fn shares_frozen_group(&self, a: RecordId, b: RecordId) -> bool {
        match (self.frozen_in.get(&a), self.frozen_in.get(&b)) {
            (Some(x), Some(y)) => !x.is_disjoint(y),
            _ => false,
        }
    }

    fn upsert_edge(
        &mut self,
        a: RecordId,
        b: RecordId,
        score: &PairScore,
        config: &DetectionConfig,
    ) -> Option<(RecordId, RecordId)> {
        if score.score < config.group_threshold {
            return None;
        }
        let (a2, link_a) = self.anchor(a);
        let (b2, link_b) = self.anchor(b);
        if a2 == b2
            || self.shares_frozen_group(a, b)
            || self.shares_frozen_group(a2, b2)
            || [a, b, a2, b2].iter().any(|r| self.retracted.contains(r))
        {
            return None;
        }

        let edge = Edge {
            score: score.score,
            matched: score.matched_fields(),
            links: link_a.into_iter().chain(link_b).collect(),
        };
        self.put_edge(a2, b2, edge.clone());
        self.put_edge(b2, a2, edge);
        self.forest.make_set(a2);
        self.forest.make_set(b2);
        Some((a2, b2))
    }

    fn put_edge(&mut self, from: RecordId, to: RecordId, edge: Edge) {
        let adjacency = self.edges.entry(from).or_default();
        match adjacency.get_mut(&to) {
            Some(existing) => {
                if edge.score > existing.score {
                    existing.score = edge.score;
                }
                existing.matched.extend(edge.matched);
                existing.links.extend(edge.links);
            }
            None => {
                adjacency.insert(to, edge);
            }
        }
    }

    fn drop_edges_of(&mut self, record: RecordId) {
        if let Some(adjacency) = self.edges.remove(&record) {
            for other in adjacency.keys() {
                if let Some(back) = self.edges.get_mut(other) {
                    back.remove(&record);
                }
            }
        }
    }

    /// 记录一条合格边并立即合并所在分组
    pub fn add_edge(
        &mut self,
        a: RecordId,
        b: RecordId,
        score: &PairScore,
        config: &DetectionConfig,
        now: DateTime<Utc>,
    ) {
        let Some((a2, b2)) = self.upsert_edge(a, b, score, config) else {
            return;
        };
        if let Err(e) = self.union_groups(a2, b2, config, now) {
            let nodes = self.component_closure(&[a2, b2]);
            tracing::error!(
                "[Cluster] {} - 重建分量 {:?}, 分组状态: {:?}",
                e,
                nodes,
                nodes
                    .iter()
                    .filter_map(|n| self.pending_by_record.get(n))
                    .collect::<BTreeSet<_>>()
                    .into_iter()
                    .filter_map(|g| self.groups.get(g))
                    .collect::<Vec<_>>()
            );
            self.rebuild(nodes, config, now);
        }
    }

    /// 只记录边，不合并 (重处理期间使用，最后统一 rebuild_all)
    pub fn record_edge(&mut self, a: RecordId, b: RecordId, score: &PairScore, config: &DetectionConfig) {
        self.upsert_edge(a, b, score, config);
    }

    fn union_groups(
        &mut self,
        a: RecordId,
        b: RecordId,
        config: &DetectionConfig,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let ga = self.pending_group_of(a);
        let gb = self.pending_group_of(b);

        if self.forest.same_set(a, b) {
            return match (ga, gb) {
                (Some(x), Some(y)) if x == y => {
                    let members = self.members_or_self(Some(x), a);
                    self.refresh_group(x, members, config, now);
                    self.verify_group(x)
                }
                _ => Err(DedupError::Consistency(format!(
                    "records {} and {} share a component but map to groups {:?} / {:?}",
                    a, b, ga, gb
                ))),
            };
        }

        self.forest.union(a, b);
        let mut members = self.members_or_self(ga, a);
        members.extend(self.members_or_self(gb, b));

        let keep = match (ga, gb) {
            (Some(x), Some(y)) if x != y => {
                let (keep, absorbed) = (x.min(y), x.max(y));
                self.dissolve(absorbed, Some(keep), now);
                keep
            }
            (Some(x), _) | (None, Some(x)) => x,
            (None, None) => self.next_group_id(),
        };
        self.refresh_group(keep, members, config, now);
        self.verify_group(keep)
    }

    fn members_or_self(&self, group: Option<GroupId>, record: RecordId) -> BTreeSet<RecordId> {
        let mut members = group
            .and_then(|g| self.groups.get(&g))
            .map(|g| g.members.clone())
            .unwrap_or_default();
        members.insert(record);
        members
    }

    /// 组内任意边的最大评分 + 命中字段并集 + 关联分组并集
    fn aggregate(&self, members: &BTreeSet<RecordId>) -> (f64, BTreeSet<MatchField>, BTreeSet<GroupId>) {
        let mut best: f64 = 0.0;
        let mut matched = BTreeSet::new();
        let mut links = BTreeSet::new();
        for m in members {
            let Some(adjacency) = self.edges.get(m) else {
                continue;
            };
            for (other, edge) in adjacency.range((m + 1)..) {
                if members.contains(other) {
                    best = best.max(edge.score);
                    matched.extend(edge.matched.iter().copied());
                    links.extend(edge.links.iter().copied());
                }
            }
        }
        (best, matched, links)
    }

    fn refresh_group(
        &mut self,
        id: GroupId,
        members: BTreeSet<RecordId>,
        config: &DetectionConfig,
        now: DateTime<Utc>,
    ) {
        let (risk_score, matched_fields, linked_groups) = self.aggregate(&members);
        let risk_tier = classify(risk_score, &config.risk);

        let event = match self.groups.get_mut(&id) {
            Some(group) if !group.status.is_pending() => {
                tracing::error!("[Cluster] 拒绝修改已冻结分组 {} ({})", id, group.status);
                return;
            }
            Some(group) => {
                let changed = group.members != members
                    || group.risk_score.to_bits() != risk_score.to_bits()
                    || group.risk_tier != risk_tier
                    || group.matched_fields != matched_fields
                    || group.linked_groups != linked_groups;
                if !changed {
                    for m in &members {
                        self.pending_by_record.insert(*m, id);
                    }
                    return;
                }
                group.members = members.clone();
                group.risk_score = risk_score;
                group.risk_tier = risk_tier;
                group.matched_fields = matched_fields;
                group.linked_groups = linked_groups;
                group.version += 1;
                group.updated_at = now;
                GroupEvent::GroupUpdated {
                    group_id: id,
                    version: group.version,
                    members: members.iter().copied().collect(),
                    risk_tier,
                }
            }
            None => {
                self.groups.insert(
                    id,
                    DuplicateGroup {
                        id,
                        members: members.clone(),
                        risk_score,
                        risk_tier,
                        matched_fields,
                        status: GroupStatus::Pending,
                        resolution: None,
                        linked_groups,
                        absorbed_into: None,
                        version: 1,
                        created_at: now,
                        updated_at: now,
                    },
                );
                GroupEvent::GroupFormed {
                    group_id: id,
                    version: 1,
                    members: members.iter().copied().collect(),
                    risk_tier,
                }
            }
        };

        for m in &members {
            self.pending_by_record.insert(*m, id);
        }
        tracing::debug!("[Cluster] {:?}", event);
        self.events.push(event);
        self.dirty.insert(id);
    }

    fn dissolve(&mut self, id: GroupId, absorbed_into: Option<GroupId>, now: DateTime<Utc>) {
        let Some(group) = self.groups.get_mut(&id) else {
            return;
        };
        if !group.status.is_pending() {
            return;
        }
        group.status = GroupStatus::Dissolved;
        group.absorbed_into = absorbed_into;
        group.version += 1;
        group.updated_at = now;
        let event = GroupEvent::GroupDissolved {
            group_id: id,
            version: group.version,
            absorbed_into,
        };
        let members: Vec<RecordId> = group.members.iter().copied().collect();

        for m in members {
            if self.pending_by_record.get(&m) == Some(&id) {
                self.pending_by_record.remove(&m);
            }
        }
        tracing::info!("[Cluster] 分组 {} 解散 (并入: {:?})", id, absorbed_into);
        self.events.push(event);
        self.dirty.insert(id);
    }

    fn verify_group(&mut self, id: GroupId) -> Result<()> {
        let members = match self.groups.get(&id) {
            Some(g) if g.members.len() >= 2 => g.members.clone(),
            Some(g) => {
                return Err(DedupError::Consistency(format!(
                    "group {} has {} member(s)",
                    id,
                    g.members.len()
                )))
            }
            None => return Err(DedupError::Consistency(format!("group {} vanished", id))),
        };

        let mut roots = BTreeSet::new();
        for m in &members {
            if self.pending_group_of(*m) != Some(id) {
                return Err(DedupError::Consistency(format!(
                    "record {} of group {} is mapped to {:?}",
                    m,
                    id,
                    self.pending_group_of(*m)
                )));
            }
            roots.insert(self.forest.find(*m));
        }
        if roots.len() != 1 {
            return Err(DedupError::Consistency(format!(
                "group {} spans {} components",
                id,
                roots.len()
            )));
        }
        Ok(())
    }

    /// 从种子出发，沿 pending 分组成员与边扩展出完整分量
    fn component_closure(&self, seeds: &[RecordId]) -> BTreeSet<RecordId> {
        let mut nodes: BTreeSet<RecordId> = BTreeSet::new();
        let mut queue: Vec<RecordId> = seeds.to_vec();
        while let Some(n) = queue.pop() {
            if !nodes.insert(n) {
                continue;
            }
            if let Some(g) = self.pending_by_record.get(&n).and_then(|g| self.groups.get(g)) {
                queue.extend(g.members.iter().filter(|m| !nodes.contains(m)));
            }
            if let Some(adjacency) = self.edges.get(&n) {
                queue.extend(adjacency.keys().filter(|m| !nodes.contains(m)));
            }
        }
        nodes
    }

    /// 针对一组节点从边表重新推导连通性 (O(分量大小²)，仅用于撤回/一致性修复)
    fn rebuild(&mut self, nodes: BTreeSet<RecordId>, config: &DetectionConfig, now: DateTime<Utc>) {
        let old_groups: BTreeSet<GroupId> = nodes
            .iter()
            .filter_map(|n| self.pending_group_of(*n))
            .collect();
        self.forest.remove_component(&nodes);
        for n in &nodes {
            self.pending_by_record.remove(n);
        }
        self.recompute(nodes, old_groups, config, now);
    }

    /// 全量重建：所有 pending 分组按当前边表重新求连通分量
    pub fn rebuild_all(&mut self, config: &DetectionConfig, now: DateTime<Utc>) {
        let nodes: BTreeSet<RecordId> = self.forest.nodes().collect();
        let old_groups: BTreeSet<GroupId> = self
            .groups
            .values()
            .filter(|g| g.status.is_pending())
            .map(|g| g.id)
            .collect();
        self.forest.clear();
        self.pending_by_record.clear();
        self.recompute(nodes, old_groups, config, now);
    }

    fn recompute(
        &mut self,
        nodes: BTreeSet<RecordId>,
        old_groups: BTreeSet<GroupId>,
        config: &DetectionConfig,
        now: DateTime<Utc>,
    ) {
        let live: BTreeSet<RecordId> = nodes
            .into_iter()
            .filter(|n| !self.retracted.contains(n))
            .collect();
        for n in &live {
            self.forest.make_set(*n);
        }
        for n in &live {
            let neighbours: Vec<RecordId> = self
                .edges
                .get(n)
                .map(|adjacency| adjacency.keys().copied().filter(|m| live.contains(m)).collect())
                .unwrap_or_default();
            for m in neighbours {
                self.forest.union(*n, m);
            }
        }

        let mut by_root: BTreeMap<RecordId, BTreeSet<RecordId>> = BTreeMap::new();
        for n in &live {
            let root = self.forest.find(*n);
            by_root.entry(root).or_default().insert(*n);
        }
        let mut components: Vec<BTreeSet<RecordId>> =
            by_root.into_values().filter(|c| c.len() >= 2).collect();
        components.sort_by_key(|c| c.iter().next().copied());

        // 旧分组按 id 升序认领重叠最多的分量，保持分组 id 稳定
        let mut assigned: Vec<Option<GroupId>> = vec![None; components.len()];
        let mut reused: BTreeSet<GroupId> = BTreeSet::new();
        for g in &old_groups {
            let Some(old) = self.groups.get(g) else {
                continue;
            };
            let best = components
                .iter()
                .enumerate()
                .filter(|(i, _)| assigned[*i].is_none())
                .map(|(i, c)| (i, c.intersection(&old.members).count()))
                .filter(|(_, overlap)| *overlap > 0)
                .max_by(|(ia, oa), (ib, ob)| oa.cmp(ob).then(ib.cmp(ia)));
            if let Some((i, _)) = best {
                assigned[i] = Some(*g);
                reused.insert(*g);
            }
        }

        for (component, slot) in components.into_iter().zip(assigned) {
            let id = match slot {
                Some(g) => g,
                None => self.next_group_id(),
            };
            self.refresh_group(id, component, config, now);
        }
        for g in old_groups.difference(&reused) {
            self.dissolve(*g, None, now);
        }
    }

    /// 删除 record 与满足 stale 的邻居之间的边，分组暂不变
    pub fn forget_edges_where<F>(&mut self, record: RecordId, mut stale: F)
    where
        F: FnMut(RecordId) -> bool,
    {
        let gone: Vec<RecordId> = match self.edges.get(&record) {
            Some(adjacency) => adjacency.keys().copied().filter(|n| stale(*n)).collect(),
            None => return,
        };
        for n in gone {
            if let Some(adjacency) = self.edges.get_mut(&record) {
                adjacency.remove(&n);
            }
            if let Some(back) = self.edges.get_mut(&n) {
                back.remove(&record);
            }
        }
    }

    /// 撤回记录：删除其边并重建所在分量。
    /// 返回原本重定向到该记录的被取代记录，它们需要重新匹配
    pub fn retract(&mut self, record: RecordId, config: &DetectionConfig, now: DateTime<Utc>) -> Vec<RecordId> {
        let orphaned: Vec<RecordId> = self
            .superseded_by
            .keys()
            .copied()
            .filter(|m| self.anchor(*m).0 == record)
            .collect();
        self.retracted.insert(record);
        self.drop_edges_of(record);
        match self.pending_group_of(record) {
            Some(g) => {
                let mut nodes = self.members_or_self(Some(g), record);
                nodes.extend(self.component_closure(&[record]));
                self.rebuild(nodes, config, now);
            }
            None => {
                if self.forest.contains(record) {
                    self.forest.remove_component(&[record]);
                }
            }
        }
        orphaned
    }

    /// 冻结分组：成员移出并查集与边表，合并时标记非保留记录被取代
    fn freeze(&mut self, id: GroupId, survivor: Option<RecordId>) {
        let Some(members) = self.groups.get(&id).map(|g| g.members.clone()) else {
            return;
        };
        self.forest.remove_component(&members);
        for m in &members {
            self.pending_by_record.remove(m);
            self.drop_edges_of(*m);
            self.frozen_in.entry(*m).or_default().insert(id);
        }
        if let Some(s) = survivor {
            for m in members.iter().filter(|m| **m != s) {
                self.superseded_by.insert(*m, (s, id));
            }
        }
    }

    /// 执行处置 (调用方已完成状态校验)
    pub(crate) fn apply_resolution(
        &mut self,
        id: GroupId,
        disposition: Disposition,
        resolver_id: &str,
        now: DateTime<Utc>,
    ) -> Result<DuplicateGroup> {
        if !self.groups.contains_key(&id) {
            return Err(DedupError::GroupNotFound(id));
        }
        self.freeze(id, disposition.survivor());

        let group = self.groups.get_mut(&id).ok_or(DedupError::GroupNotFound(id))?;
        group.status = disposition.target_status();
        group.resolution = Some(Resolution {
            resolver_id: resolver_id.to_string(),
            resolved_at: now,
            survivor: disposition.survivor(),
        });
        group.version += 1;
        group.updated_at = now;
        let snapshot = group.clone();

        self.events.push(GroupEvent::GroupResolved {
            group_id: id,
            version: snapshot.version,
            status: snapshot.status,
            survivor: disposition.survivor(),
        });
        self.dirty.insert(id);
        Ok(snapshot)
    }
}

/// 聚类引擎：独占聚类索引 (单把锁)，并维护供审核端并发读取的分组视图
#[derive(Debug, Default)]
pub struct ClusterEngine {
    index: Mutex<ClusterIndex>,
    view: DashMap<GroupId, DuplicateGroup>,
}

impl ClusterEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ClusterIndex> {
        self.index.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 锁内同步只读视图；事件在锁释放后由调用方发布
    fn publish(&self, index: &mut ClusterIndex) -> Vec<GroupEvent> {
        let (changed, events) = index.drain_changes();
        for group in changed {
            self.view.insert(group.id, group);
        }
        events
    }

    /// 将一条新记录与其合格候选合并进分组
    pub fn link_record(
        &self,
        record: RecordId,
        scored: &[(RecordId, PairScore)],
        config: &DetectionConfig,
    ) -> Vec<GroupEvent> {
        let mut index = self.lock();
        let now = Utc::now();
        for (candidate, score) in scored {
            index.add_edge(record, *candidate, score, config, now);
        }
        self.publish(&mut index)
    }

    /// 重处理单条记录：替换其旧边但不合并，最后由 rebuild_all 统一推导分组
    pub fn rescore_record<F>(
        &self,
        record: RecordId,
        scored: &[(RecordId, PairScore)],
        stale: F,
        config: &DetectionConfig,
    ) where
        F: FnMut(RecordId) -> bool,
    {
        let mut index = self.lock();
        index.forget_edges_where(record, stale);
        for (candidate, score) in scored {
            index.record_edge(record, *candidate, score, config);
        }
    }

    pub fn rebuild_all(&self, config: &DetectionConfig) -> Vec<GroupEvent> {
        let mut index = self.lock();
        index.rebuild_all(config, Utc::now());
        self.publish(&mut index)
    }

    /// 返回 (分组事件, 需重新匹配的被取代记录)
    pub fn retract(&self, record: RecordId, config: &DetectionConfig) -> (Vec<GroupEvent>, Vec<RecordId>) {
        let mut index = self.lock();
        let mut orphaned = index.retract(record, config, Utc::now());
        orphaned.sort_unstable();
        (self.publish(&mut index), orphaned)
    }

    pub fn resolve(
        &self,
        group_id: GroupId,
        disposition: Disposition,
        resolver_id: &str,
    ) -> Result<(ResolutionOutcome, Vec<GroupEvent>)> {
        let mut index = self.lock();
        let outcome = resolution::resolve(&mut index, group_id, disposition, resolver_id, Utc::now());
        let events = self.publish(&mut index);
        outcome.map(|o| (o, events))
    }

    pub fn group(&self, id: GroupId) -> Option<DuplicateGroup> {
        self.view.get(&id).map(|g| g.value().clone())
    }

    /// 按 id 升序分页；cursor 为上一页最后一个 id
    pub fn list(&self, filter: &GroupFilter, cursor: Option<GroupId>, limit: usize) -> GroupPage {
        let mut ids: Vec<GroupId> = self
            .view
            .iter()
            .filter(|g| cursor.map_or(true, |c| g.id > c) && filter.matches(g.value()))
            .map(|g| g.id)
            .collect();
        ids.sort_unstable();

        let limit = limit.max(1);
        let has_more = ids.len() > limit;
        let groups: Vec<_> = ids
            .into_iter()
            .take(limit)
            .filter_map(|id| self.view.get(&id).map(|g| g.summary()))
            .collect();
        let next_cursor = if has_more { groups.last().map(|g| g.id) } else { None };
        GroupPage { groups, next_cursor }
    }

    pub fn all_groups(&self) -> Vec<DuplicateGroup> {
        let mut groups: Vec<DuplicateGroup> = self.view.iter().map(|g| g.value().clone()).collect();
        groups.sort_by_key(|g| g.id);
        groups
    }

    pub fn audit_log(&self, id: GroupId) -> Vec<AuditEntry> {
        self.lock().audit_log(id)
    }

    pub fn pending_group_of(&self, record: RecordId) -> Option<GroupId> {
        self.lock().pending_group_of(record)
    }

    pub fn superseded_by(&self, record: RecordId) -> Option<RecordId> {
        self.lock().superseded_by(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FieldMatch;

    fn edge(score: f64) -> PairScore {
        PairScore {
            score,
            matches: vec![FieldMatch {
                field: MatchField::Vendor,
                confidence: 1.0,
            }],
        }
    }

    fn setup() -> (ClusterIndex, DetectionConfig, DateTime<Utc>) {
        (ClusterIndex::new(), DetectionConfig::default(), Utc::now())
    }

    fn members(index: &ClusterIndex, id: GroupId) -> Vec<RecordId> {
        index.group(id).unwrap().members.iter().copied().collect()
    }

    #[test]
    fn edges_below_threshold_never_group() {
        let (mut index, config, now) = setup();
        index.add_edge(1, 2, &edge(0.79), &config, now);
        assert_eq!(index.pending_group_of(1), None);
        assert!(index.drain_changes().1.is_empty());
    }

    #[test]
    fn grouping_is_transitive_through_connectivity() {
        let (mut index, config, now) = setup();
        index.add_edge(1, 2, &edge(0.95), &config, now);
        index.add_edge(2, 3, &edge(0.82), &config, now);
        // score(1,3) 从未达到阈值，但三者仍在同一分组

        let g = index.pending_group_of(1).unwrap();
        assert_eq!(index.pending_group_of(3), Some(g));
        assert_eq!(members(&index, g), vec![1, 2, 3]);
        let group = index.group(g).unwrap();
        assert_eq!(group.risk_score, 0.95);
        assert_eq!(group.version, 2);

        let (_, events) = index.drain_changes();
        assert!(matches!(events[0], GroupEvent::GroupFormed { .. }));
        assert!(matches!(events[1], GroupEvent::GroupUpdated { .. }));
    }

    #[test]
    fn connecting_two_groups_absorbs_the_newer_one() {
        let (mut index, config, now) = setup();
        index.add_edge(1, 2, &edge(0.9), &config, now);
        index.add_edge(3, 4, &edge(0.9), &config, now);
        let (g1, g2) = (index.pending_group_of(1).unwrap(), index.pending_group_of(3).unwrap());
        index.add_edge(2, 3, &edge(0.85), &config, now);

        assert_eq!(members(&index, g1), vec![1, 2, 3, 4]);
        let absorbed = index.group(g2).unwrap();
        assert_eq!(absorbed.status, GroupStatus::Dissolved);
        assert_eq!(absorbed.absorbed_into, Some(g1));
        assert_eq!(index.pending_group_of(4), Some(g1));
    }

    #[test]
    fn retraction_dissolves_group_below_two_members() {
        let (mut index, config, now) = setup();
        index.add_edge(1, 2, &edge(0.9), &config, now);
        let g = index.pending_group_of(1).unwrap();
        index.retract(2, &config, now);

        assert_eq!(index.group(g).unwrap().status, GroupStatus::Dissolved);
        assert_eq!(index.pending_group_of(1), None);
        // 撤回的记录不再参与成组
        index.add_edge(1, 2, &edge(0.99), &config, now);
        assert_eq!(index.pending_group_of(1), None);
    }

    #[test]
    fn retraction_splits_component_and_keeps_group_id() {
        let (mut index, config, now) = setup();
        index.add_edge(1, 2, &edge(0.9), &config, now);
        index.add_edge(2, 3, &edge(0.85), &config, now);
        index.add_edge(3, 4, &edge(0.95), &config, now);
        index.add_edge(4, 5, &edge(0.88), &config, now);
        let g = index.pending_group_of(1).unwrap();

        index.retract(3, &config, now);

        assert_eq!(members(&index, g), vec![1, 2]);
        assert_eq!(index.group(g).unwrap().risk_score, 0.9);
        let other = index.pending_group_of(4).unwrap();
        assert_ne!(other, g);
        assert_eq!(members(&index, other), vec![4, 5]);
        assert_eq!(index.pending_group_of(3), None);
    }

    #[test]
    fn retracted_survivor_stops_redirecting_superseded_records() {
        let (mut index, config, now) = setup();
        index.add_edge(1, 2, &edge(0.95), &config, now);
        let g = index.pending_group_of(1).unwrap();
        index
            .apply_resolution(g, Disposition::Merge { survivor: 1 }, "alice", now)
            .unwrap();

        assert_eq!(index.retract(1, &config, now), vec![2]);
        assert_eq!(index.superseded_by(2), None);

        index.add_edge(3, 2, &edge(0.9), &config, now);
        let h = index.pending_group_of(3).unwrap();
        assert_eq!(members(&index, h), vec![2, 3]);
        assert!(index.group(h).unwrap().linked_groups.contains(&g));
    }

    #[test]
    fn merged_group_is_frozen_and_new_matches_open_linked_group() {
        let (mut index, config, now) = setup();
        index.add_edge(1, 2, &edge(0.95), &config, now);
        let g = index.pending_group_of(1).unwrap();
        index
            .apply_resolution(g, Disposition::Merge { survivor: 1 }, "alice", now)
            .unwrap();
        assert_eq!(index.superseded_by(2), Some(1));

        // 新记录 3 命中被取代的 2，应与保留记录 1 组成新分组
        index.add_edge(3, 2, &edge(0.9), &config, now);
        let h = index.pending_group_of(3).unwrap();
        assert_ne!(h, g);
        assert_eq!(members(&index, h), vec![1, 3]);
        assert!(index.group(h).unwrap().linked_groups.contains(&g));

        let frozen = index.group(g).unwrap();
        assert_eq!(frozen.status, GroupStatus::Merged);
        assert_eq!(frozen.members.iter().copied().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn ignored_pair_is_not_regrouped_but_third_record_can_match() {
        let (mut index, config, now) = setup();
        index.add_edge(1, 2, &edge(0.95), &config, now);
        let g = index.pending_group_of(1).unwrap();
        index.apply_resolution(g, Disposition::Ignore, "bob", now).unwrap();

        index.add_edge(1, 2, &edge(0.95), &config, now);
        assert_eq!(index.pending_group_of(1), None);

        index.add_edge(3, 2, &edge(0.9), &config, now);
        let h = index.pending_group_of(3).unwrap();
        assert_eq!(members(&index, h), vec![2, 3]);
        assert!(index.group(h).unwrap().linked_groups.contains(&g));
    }

    #[test]
    fn consistency_violation_triggers_rebuild() {
        let (mut index, config, now) = setup();
        index.add_edge(1, 2, &edge(0.9), &config, now);
        let g = index.pending_group_of(1).unwrap();
        index.pending_by_record.insert(2, 99);

        index.add_edge(1, 2, &edge(0.9), &config, now);
        assert_eq!(index.pending_group_of(2), Some(g));
        assert!(index.verify_group(g).is_ok());
    }

    #[test]
    fn rebuild_all_is_stable_when_edges_are_unchanged() {
        let (mut index, config, now) = setup();
        index.add_edge(1, 2, &edge(0.9), &config, now);
        index.add_edge(5, 6, &edge(0.85), &config, now);
        index.drain_changes();

        index.rebuild_all(&config, now);
        let (changed, events) = index.drain_changes();
        assert!(changed.is_empty());
        assert!(events.is_empty());
    }

    #[test]
    fn engine_list_pages_through_groups() {
        let engine = ClusterEngine::new();
        let config = DetectionConfig::default();
        for i in 0..5 {
            engine.link_record(i * 10, &[(i * 10 + 1, edge(0.9))], &config);
        }

        let first = engine.list(&GroupFilter::default(), None, 2);
        assert_eq!(first.groups.len(), 2);
        let second = engine.list(&GroupFilter::default(), first.next_cursor, 2);
        assert_eq!(second.groups.len(), 2);
        let third = engine.list(&GroupFilter::default(), second.next_cursor, 2);
        assert_eq!(third.groups.len(), 1);
        assert_eq!(third.next_cursor, None);
    }
}
