//! Raft-style consensus node
//!
//! One event-loop task owns all protocol state: inbound frames, append
//! commands and timers are funneled through it and handled one at a time,
//! so no handler ever observes a torn view. The loop emits
//! [`ConsensusEvent`]s to the owning engine: committed entries in strictly
//! increasing index order (each exactly once) and leadership changes.

use crate::transport::{GossipTransport, InboundFrame};
use crate::types::{
    ConsensusConfig, ConsensusError, ConsensusMessage, LogEntry, NodeRole, RaftMessage,
};
use parking_lot::RwLock;
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Events surfaced to the owning engine.
#[derive(Debug)]
pub enum ConsensusEvent {
    /// The cluster reached consensus on this entry. Delivered exactly once
    /// per node, in strictly increasing index order.
    Committed { index: u64, message: ConsensusMessage },
    /// This node's role changed; the block builder starts or stops on it.
    LeadershipChanged { role: NodeRole },
}

enum Command {
    Append(ConsensusMessage),
    Shutdown,
}

/// Cloneable handle to a running consensus node.
#[derive(Clone)]
pub struct RaftHandle {
    node_name: String,
    commands: mpsc::UnboundedSender<Command>,
    role: Arc<RwLock<NodeRole>>,
}

impl RaftHandle {
    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    pub fn role(&self) -> NodeRole {
        *self.role.read()
    }

    pub fn is_leader(&self) -> bool {
        self.role() == NodeRole::Leader
    }

    /// Append an entry to the replicated log. Leader-only: followers get
    /// `NotLeader` and must not retry blindly.
    pub fn append(&self, message: ConsensusMessage) -> Result<(), ConsensusError> {
        if !self.is_leader() {
            return Err(ConsensusError::NotLeader);
        }
        self.commands
            .send(Command::Append(message))
            .map_err(|_| ConsensusError::ShuttingDown)
    }

    /// Ask the event loop to stop. Idempotent.
    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }
}

/// Leader-side replication progress for one peer.
struct PeerReplication {
    next_index: u64,
    match_index: u64,
}

/// The consensus state machine. Constructed via [`RaftNode::spawn`], which
/// hands back a handle, the event stream and the loop's join handle.
pub struct RaftNode {
    config: ConsensusConfig,
    transport: Arc<GossipTransport>,

    role: NodeRole,
    shared_role: Arc<RwLock<NodeRole>>,
    current_term: u64,
    voted_for: Option<String>,
    log: Vec<LogEntry>,
    commit_index: u64,
    last_applied: u64,
    votes_granted: HashSet<String>,
    /// Peers seen so far; replication state is leader-only bookkeeping
    peers: HashMap<String, PeerReplication>,

    election_deadline: Instant,
    events: mpsc::UnboundedSender<ConsensusEvent>,
}

impl RaftNode {
    /// Spawn the consensus event loop.
    pub fn spawn(
        config: ConsensusConfig,
        transport: Arc<GossipTransport>,
        inbound: mpsc::UnboundedReceiver<InboundFrame>,
    ) -> (
        RaftHandle,
        mpsc::UnboundedReceiver<ConsensusEvent>,
        JoinHandle<()>,
    ) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let shared_role = Arc::new(RwLock::new(NodeRole::Follower));

        let handle = RaftHandle {
            node_name: config.node_name.clone(),
            commands: command_tx,
            role: shared_role.clone(),
        };

        let node = RaftNode {
            election_deadline: Instant::now(),
            shared_role,
            transport,
            role: NodeRole::Follower,
            current_term: 0,
            voted_for: None,
            log: Vec::new(),
            commit_index: 0,
            last_applied: 0,
            votes_granted: HashSet::new(),
            peers: HashMap::new(),
            events: event_tx,
            config,
        };

        let join = tokio::spawn(node.run(command_rx, inbound));
        (handle, event_rx, join)
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut inbound: mpsc::UnboundedReceiver<InboundFrame>,
    ) {
        self.transport.connect();
        self.reset_election_deadline();

        let mut heartbeat =
            tokio::time::interval(Duration::from_millis(self.config.heartbeat_interval_ms));
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::info!(
            node = %self.config.node_name,
            cluster_size = self.config.cluster_size,
            "Consensus node started"
        );

        loop {
            let election_sleep = tokio::time::sleep_until(self.election_deadline);
            tokio::select! {
                maybe_command = commands.recv() => match maybe_command {
                    Some(Command::Append(message)) => self.on_append(message),
                    Some(Command::Shutdown) | None => break,
                },
                maybe_frame = inbound.recv() => match maybe_frame {
                    Some((origin, message)) => self.on_message(origin, message),
                    None => break,
                },
                _ = election_sleep, if self.role != NodeRole::Leader => {
                    self.on_election_timeout();
                }
                _ = heartbeat.tick(), if self.role == NodeRole::Leader => {
                    self.send_heartbeats();
                }
            }
        }

        self.transport.disconnect();
        tracing::info!(node = %self.config.node_name, "Consensus node stopped");
    }

    // ---- timers ----

    fn reset_election_deadline(&mut self) {
        let timeout_ms = rand::thread_rng()
            .gen_range(self.config.election_timeout.min_ms..=self.config.election_timeout.max_ms);
        self.election_deadline = Instant::now() + Duration::from_millis(timeout_ms);
    }

    fn on_election_timeout(&mut self) {
        self.set_role(NodeRole::Candidate);
        self.current_term += 1;
        self.voted_for = Some(self.config.node_name.clone());
        self.votes_granted = HashSet::from([self.config.node_name.clone()]);
        self.reset_election_deadline();

        tracing::info!(
            node = %self.config.node_name,
            term = self.current_term,
            "No heartbeat within election timeout, standing for election"
        );

        if self.votes_granted.len() >= self.config.majority() {
            self.become_leader();
            return;
        }

        self.transport.broadcast(&RaftMessage::RequestVote {
            term: self.current_term,
            last_log_index: self.last_log_index(),
            last_log_term: self.last_log_term(),
        });
    }

    fn send_heartbeats(&mut self) {
        let peer_names: Vec<String> = self.peers.keys().cloned().collect();
        for name in peer_names {
            self.send_append_to(&name);
        }
        // Members we have never heard from can't be addressed directly;
        // probe them with an untargeted empty append so they learn the
        // leader and respond.
        if self.peers.len() + 1 < self.config.cluster_size {
            self.transport.broadcast(&RaftMessage::AppendEntries {
                term: self.current_term,
                prev_log_index: self.last_log_index(),
                prev_log_term: self.last_log_term(),
                entries: Vec::new(),
                leader_commit: self.commit_index,
            });
        }
    }

    // ---- command surface ----

    fn on_append(&mut self, message: ConsensusMessage) {
        if self.role != NodeRole::Leader {
            // Demoted between the handle check and the loop picking the
            // command up; the proposer retries after the next election.
            tracing::debug!(node = %self.config.node_name, "Dropping append, no longer leader");
            return;
        }

        let entry = LogEntry {
            term: self.current_term,
            index: self.last_log_index() + 1,
            message,
        };
        tracing::debug!(
            node = %self.config.node_name,
            index = entry.index,
            term = entry.term,
            "Appending entry to replicated log"
        );
        self.log.push(entry);

        let peer_names: Vec<String> = self.peers.keys().cloned().collect();
        for name in peer_names {
            self.send_append_to(&name);
        }
        // A cluster of one reaches quorum on its own log.
        self.advance_commit_index();
    }

    // ---- inbound protocol frames ----

    fn on_message(&mut self, origin: String, message: RaftMessage) {
        let next_index = self.last_log_index() + 1;
        self.peers
            .entry(origin.clone())
            .or_insert(PeerReplication {
                next_index,
                match_index: 0,
            });

        match message {
            RaftMessage::RequestVote {
                term,
                last_log_index,
                last_log_term,
            } => self.on_request_vote(origin, term, last_log_index, last_log_term),
            RaftMessage::RequestVoteResponse { term, vote_granted } => {
                self.on_vote_response(origin, term, vote_granted)
            }
            RaftMessage::AppendEntries {
                term,
                prev_log_index,
                prev_log_term,
                entries,
                leader_commit,
            } => self.on_append_entries(
                origin,
                term,
                prev_log_index,
                prev_log_term,
                entries,
                leader_commit,
            ),
            RaftMessage::AppendEntriesResponse {
                term,
                success,
                match_index,
            } => self.on_append_response(origin, term, success, match_index),
        }
    }

    fn on_request_vote(
        &mut self,
        origin: String,
        term: u64,
        last_log_index: u64,
        last_log_term: u64,
    ) {
        if term > self.current_term {
            self.adopt_term(term);
        }

        let up_to_date = (last_log_term, last_log_index)
            >= (self.last_log_term(), self.last_log_index());
        let grant = term == self.current_term
            && up_to_date
            && self.voted_for.as_deref().map_or(true, |v| v == origin);

        if grant {
            self.voted_for = Some(origin.clone());
            self.reset_election_deadline();
            tracing::debug!(node = %self.config.node_name, candidate = %origin, term, "Granting vote");
        }

        self.transport.send(
            &origin,
            &RaftMessage::RequestVoteResponse {
                term: self.current_term,
                vote_granted: grant,
            },
        );
    }

    fn on_vote_response(&mut self, origin: String, term: u64, vote_granted: bool) {
        if term > self.current_term {
            self.adopt_term(term);
            return;
        }
        if self.role != NodeRole::Candidate || term != self.current_term {
            return;
        }
        if vote_granted {
            self.votes_granted.insert(origin);
            if self.votes_granted.len() >= self.config.majority() {
                self.become_leader();
            }
        }
    }

    fn on_append_entries(
        &mut self,
        origin: String,
        term: u64,
        prev_log_index: u64,
        prev_log_term: u64,
        entries: Vec<LogEntry>,
        leader_commit: u64,
    ) {
        if term < self.current_term {
            // Stale leader; our term in the response demotes it.
            self.transport.send(
                &origin,
                &RaftMessage::AppendEntriesResponse {
                    term: self.current_term,
                    success: false,
                    match_index: 0,
                },
            );
            return;
        }
        if term > self.current_term {
            self.adopt_term(term);
        }
        // A live leader for the current term: candidates stand down.
        self.set_role(NodeRole::Follower);
        self.reset_election_deadline();

        let consistent = if prev_log_index == 0 {
            true
        } else {
            self.log
                .get((prev_log_index - 1) as usize)
                .map_or(false, |e| e.term == prev_log_term)
        };
        if !consistent {
            self.transport.send(
                &origin,
                &RaftMessage::AppendEntriesResponse {
                    term: self.current_term,
                    success: false,
                    match_index: 0,
                },
            );
            return;
        }

        let appended = entries.len() as u64;
        for entry in entries {
            let pos = (entry.index - 1) as usize;
            match self.log.get(pos) {
                Some(existing) if existing.term == entry.term => {
                    // Already replicated
                }
                Some(_) => {
                    // Conflicting suffix from a deposed leader
                    self.log.truncate(pos);
                    self.log.push(entry);
                }
                None => self.log.push(entry),
            }
        }

        let new_commit = leader_commit.min(self.last_log_index());
        if new_commit > self.commit_index {
            self.commit_index = new_commit;
            self.deliver_committed();
        }

        self.transport.send(
            &origin,
            &RaftMessage::AppendEntriesResponse {
                term: self.current_term,
                success: true,
                match_index: prev_log_index + appended,
            },
        );
    }

    fn on_append_response(&mut self, origin: String, term: u64, success: bool, match_index: u64) {
        if term > self.current_term {
            self.adopt_term(term);
            return;
        }
        if self.role != NodeRole::Leader || term != self.current_term {
            return;
        }
        let Some(peer) = self.peers.get_mut(&origin) else {
            return;
        };
        if success {
            peer.match_index = peer.match_index.max(match_index);
            peer.next_index = peer.match_index + 1;
            self.advance_commit_index();
        } else {
            // Consistency check failed: back off and retry immediately.
            peer.next_index = peer.next_index.saturating_sub(1).max(1);
            self.send_append_to(&origin);
        }
    }

    // ---- role transitions ----

    fn adopt_term(&mut self, term: u64) {
        tracing::debug!(
            node = %self.config.node_name,
            old_term = self.current_term,
            new_term = term,
            "Observed higher term"
        );
        self.current_term = term;
        self.voted_for = None;
        self.votes_granted.clear();
        self.set_role(NodeRole::Follower);
        self.reset_election_deadline();
    }

    fn become_leader(&mut self) {
        tracing::info!(
            node = %self.config.node_name,
            term = self.current_term,
            "Elected leader"
        );
        self.set_role(NodeRole::Leader);
        let next_index = self.last_log_index() + 1;
        for peer in self.peers.values_mut() {
            peer.next_index = next_index;
            peer.match_index = 0;
        }
        self.send_heartbeats();
        self.advance_commit_index();
    }

    fn set_role(&mut self, role: NodeRole) {
        if self.role == role {
            return;
        }
        tracing::info!(
            node = %self.config.node_name,
            from = %self.role,
            to = %role,
            term = self.current_term,
            "Role changed"
        );
        self.role = role;
        *self.shared_role.write() = role;
        let _ = self.events.send(ConsensusEvent::LeadershipChanged { role });
    }

    // ---- replication ----

    fn send_append_to(&self, peer_name: &str) {
        let Some(peer) = self.peers.get(peer_name) else {
            return;
        };
        let prev_log_index = peer.next_index - 1;
        let prev_log_term = if prev_log_index == 0 {
            0
        } else {
            self.log[(prev_log_index - 1) as usize].term
        };
        let entries = self.log[(peer.next_index - 1) as usize..].to_vec();
        self.transport.send(
            peer_name,
            &RaftMessage::AppendEntries {
                term: self.current_term,
                prev_log_index,
                prev_log_term,
                entries,
                leader_commit: self.commit_index,
            },
        );
    }

    /// Advance the leader's commit index to the highest log index known
    /// replicated on a majority, counting only entries from the current
    /// term.
    fn advance_commit_index(&mut self) {
        let majority = self.config.majority();
        let mut advanced = self.commit_index;
        for n in (self.commit_index + 1)..=self.last_log_index() {
            let replicas = 1 + self
                .peers
                .values()
                .filter(|p| p.match_index >= n)
                .count();
            if replicas >= majority && self.log[(n - 1) as usize].term == self.current_term {
                advanced = n;
            }
        }
        if advanced > self.commit_index {
            self.commit_index = advanced;
            self.deliver_committed();
        }
    }

    /// Deliver every newly durable entry, in index order, exactly once.
    fn deliver_committed(&mut self) {
        while self.last_applied < self.commit_index {
            let entry = self.log[self.last_applied as usize].clone();
            self.last_applied += 1;
            tracing::debug!(
                node = %self.config.node_name,
                index = entry.index,
                "Entry committed"
            );
            let _ = self.events.send(ConsensusEvent::Committed {
                index: entry.index,
                message: entry.message,
            });
        }
    }

    // ---- log helpers ----

    fn last_log_index(&self) -> u64 {
        self.log.len() as u64
    }

    fn last_log_term(&self) -> u64 {
        self.log.last().map_or(0, |e| e.term)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_gossip::LocalGossipHub;
    use ledger_types::{Block, BlockBody, BlockHash, BlockHeader};

    fn fast_config(node_name: &str, cluster_size: usize) -> ConsensusConfig {
        ConsensusConfig {
            node_name: node_name.to_string(),
            cluster_size,
            election_timeout: crate::types::ElectionTimeout {
                min_ms: 50,
                max_ms: 150,
            },
            heartbeat_interval_ms: 20,
            block_builder_poll_interval_ms: 30,
        }
    }

    fn message_at_height(height: u64) -> ConsensusMessage {
        ConsensusMessage {
            block: Block {
                header: BlockHeader {
                    height,
                    prev_block_hash: BlockHash::ZERO,
                    timestamp: 0,
                },
                body: BlockBody {
                    transactions: vec![],
                },
            },
        }
    }

    #[tokio::test]
    async fn test_single_node_cluster_elects_itself() {
        let hub = LocalGossipHub::new();
        let (client, _rx) = hub.join("solo");
        let (transport, inbound) = GossipTransport::new("solo", Arc::new(client));
        let (handle, mut events, join) =
            RaftNode::spawn(fast_config("solo", 1), Arc::new(transport), inbound);

        let deadline = Instant::now() + Duration::from_secs(5);
        while !handle.is_leader() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(handle.is_leader());

        // Candidate then leader notifications arrive in order
        let mut roles = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let ConsensusEvent::LeadershipChanged { role } = event {
                roles.push(role);
            }
        }
        assert_eq!(roles, vec![NodeRole::Candidate, NodeRole::Leader]);

        handle.shutdown();
        let _ = join.await;
    }

    #[tokio::test]
    async fn test_single_node_commits_appends_in_order() {
        let hub = LocalGossipHub::new();
        let (client, _rx) = hub.join("solo");
        let (transport, inbound) = GossipTransport::new("solo", Arc::new(client));
        let (handle, mut events, join) =
            RaftNode::spawn(fast_config("solo", 1), Arc::new(transport), inbound);

        let deadline = Instant::now() + Duration::from_secs(5);
        while !handle.is_leader() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        for height in 1..=3 {
            handle.append(message_at_height(height)).unwrap();
        }

        let mut committed = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(5);
        while committed.len() < 3 && Instant::now() < deadline {
            match tokio::time::timeout(Duration::from_millis(200), events.recv()).await {
                Ok(Some(ConsensusEvent::Committed { index, message })) => {
                    committed.push((index, message.block.header.height));
                }
                Ok(Some(_)) => {}
                _ => {}
            }
        }
        assert_eq!(committed, vec![(1, 1), (2, 2), (3, 3)]);

        handle.shutdown();
        let _ = join.await;
    }

    #[tokio::test]
    async fn test_append_is_rejected_on_followers() {
        let hub = LocalGossipHub::new();
        let (client, _rx) = hub.join("n1");
        // Cluster of three with no peers around: this node can never win
        let (transport, inbound) = GossipTransport::new("n1", Arc::new(client));
        let (handle, _events, join) =
            RaftNode::spawn(fast_config("n1", 3), Arc::new(transport), inbound);

        let result = handle.append(message_at_height(1));
        assert!(matches!(result, Err(ConsensusError::NotLeader)));

        handle.shutdown();
        let _ = join.await;
    }
}
