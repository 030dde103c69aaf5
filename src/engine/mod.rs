//! The public orchestrator (spec 4.5, 6, 7): one `Engine` handle per running
//! identity, wrapping the DHT overlay, transport, per-identity stores, and
//! the background workers that keep presence, the offline inbox, and the
//! contact directory in sync. [`pipeline`] and [`groups`] hold the actual
//! send/receive logic as free functions so both the send-queue worker and
//! the transport's inbound callback can drive it without borrowing the
//! whole engine; this module is the state machine and public API shell
//! around them, mirroring how the teacher's own top-level handle type is a
//! thin `Arc<Inner>` wrapper over modules that do the real work.

pub mod events;
pub mod groups;
pub mod identity;
pub mod payload;
pub mod pipeline;
pub mod state;

use crate::crypto::bip39::MasterSeed;
use crate::error::{EngineError, EngineResult};
use crate::network::dht::{
    keys, records::GroupKeyCapsuleRecord, records::GroupMetaRecord, records::NameForwardRecord,
    records::NameReverseRecord, records::PresenceRecord, DhtError, DhtValue, PayloadTag,
    SharedDht, SignedPayload,
};
use crate::network::transport::{Transport, TransportConfig};
use crate::storage::{Config, PublicKeyCache};
use crate::types::{
    Contact, Direction, Fingerprint, Group, GroupMembership, GroupSymmetricKey, Message,
    MembershipState, MessageKind, MessageStatus, Recipient,
};
use events::{Event, EventCallback, SharedEventCallback};
use identity::LoadedIdentity;
use payload::PlaintextPayload;
use state::EngineState;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// One queued outgoing 1:1 message, handed to the send worker (spec 6's
/// `send_message`/`queue_message` distinction: both paths end up here).
struct SendJob {
    recipient: Fingerprint,
    payload: PlaintextPayload,
}

struct Inner {
    data_dir: PathBuf,
    config: Config,
    state: StdMutex<EngineState>,
    identity: RwLock<Option<Arc<LoadedIdentity>>>,
    dht: RwLock<Option<SharedDht>>,
    transport: RwLock<Option<Arc<Transport>>>,
    cache: Arc<PublicKeyCache>,
    events: SharedEventCallback,
    send_tx: mpsc::Sender<SendJob>,
    send_rx: Mutex<Option<mpsc::Receiver<SendJob>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

/// The engine handle (spec 7's public surface). Cheap to clone: every clone
/// shares the same inner state, workers, and callback registration.
#[derive(Clone)]
pub struct Engine(Arc<Inner>);

impl Engine {
    /// Construct an engine against a fresh, private `Dht` overlay (the
    /// normal single-process case: one peer, one network view).
    pub fn create(data_dir: impl Into<PathBuf>) -> EngineResult<Self> {
        Self::create_inner(data_dir.into(), None)
    }

    /// Construct an engine against an already-running `Dht` overlay shared
    /// with other local `Engine` instances. This crate's `Dht::new` requires
    /// a real `Fingerprint`, which does not exist until an identity is
    /// loaded, so a brand-new engine cannot build its own overlay at
    /// construction time the way it can a `Transport`; sharing one in here
    /// instead is what lets several identities in one process — or a test
    /// simulating several peers — observe each other's published records
    /// without a real network.
    pub fn create_with_dht(data_dir: impl Into<PathBuf>, dht: SharedDht) -> EngineResult<Self> {
        Self::create_inner(data_dir.into(), Some(dht))
    }

    fn create_inner(data_dir: PathBuf, dht: Option<SharedDht>) -> EngineResult<Self> {
        std::fs::create_dir_all(&data_dir).map_err(|e| EngineError::Storage(e.to_string()))?;
        let config = Config::load(&crate::storage::config_path(&data_dir)).map_err(EngineError::from)?;
        let (send_tx, send_rx) = mpsc::channel(config.message_queue_capacity);

        let inner = Inner {
            data_dir,
            config,
            state: StdMutex::new(EngineState::Uninitialized),
            identity: RwLock::new(None),
            dht: RwLock::new(dht),
            transport: RwLock::new(None),
            cache: Arc::new(PublicKeyCache::new()),
            events: SharedEventCallback::new(),
            send_tx,
            send_rx: Mutex::new(Some(send_rx)),
            workers: Mutex::new(Vec::new()),
        };
        let engine = Self(Arc::new(inner));
        engine.set_state(EngineState::Bootstrapped);
        Ok(engine)
    }

    /// Register (or replace) the callback events are pushed to (spec 6).
    pub async fn set_event_callback(&self, callback: EventCallback) {
        self.0.events.set(callback).await;
    }

    /// Every identity directory already created under this engine's
    /// `data_dir` (spec 6's `list_identities`).
    pub fn list_identities(&self) -> EngineResult<Vec<String>> {
        LoadedIdentity::list(&self.0.data_dir)
    }

    /// Create a brand-new identity and load it, advancing straight from
    /// `Bootstrapped` to `Running` (spec 4.5).
    pub async fn create_identity(
        &self,
        name: &str,
        signing_seed: &MasterSeed,
        encryption_seed: &MasterSeed,
    ) -> EngineResult<Fingerprint> {
        let loaded = LoadedIdentity::create(&self.0.data_dir, name, signing_seed, encryption_seed)?;
        self.finish_loading(loaded).await
    }

    /// Load a previously-created identity from disk (spec 4.5's
    /// `load_identity`).
    pub async fn load_identity(&self, name: &str) -> EngineResult<Fingerprint> {
        let loaded = LoadedIdentity::load(&self.0.data_dir, name)?;
        self.finish_loading(loaded).await
    }

    async fn finish_loading(&self, loaded: LoadedIdentity) -> EngineResult<Fingerprint> {
        let loaded = Arc::new(loaded);
        let fingerprint = loaded.identity.fingerprint.clone();

        let dht = match self.0.dht.read().await.clone() {
            Some(dht) => dht,
            None => {
                if !self.0.config.bootstrap_nodes.is_empty() {
                    log::info!(
                        "{} configured bootstrap node(s) recorded for informational purposes only; \
                         this overlay has no remote transport to dial them over",
                        self.0.config.bootstrap_nodes.len()
                    );
                }
                Arc::new(crate::network::dht::Dht::new(fingerprint.clone()))
            }
        };
        *self.0.dht.write().await = Some(dht.clone());

        pipeline::publish_own_public_key(&dht, &loaded).await?;

        let signing_seed = crate::storage::keystore::load_seed(&loaded.paths.signing_key_path())
            .map_err(EngineError::from)?;
        let transport_signer = crate::crypto::SigningKeypair::generate_from_seed(signing_seed.as_bytes())
            .map_err(EngineError::from)?;
        let bind_addr: SocketAddr = "0.0.0.0:0".parse().expect("valid bind address");
        let transport = Arc::new(
            Transport::bind(fingerprint.clone(), transport_signer, dht.clone(), TransportConfig::default(), bind_addr)
                .await
                .map_err(|e| EngineError::Network(e.to_string()))?,
        );
        let recv_handle = tokio::spawn(transport.clone().run_udp_receive_loop());
        self.install_receive_callback(loaded.clone(), dht.clone(), transport.clone()).await;
        *self.0.transport.write().await = Some(transport.clone());
        self.0.workers.lock().await.push(recv_handle);

        *self.0.identity.write().await = Some(loaded.clone());
        self.set_state(EngineState::IdentityLoaded);

        publish_presence(&dht, &loaded, &transport).await?;
        self.spawn_background_workers(loaded, dht, transport).await;
        self.set_state(EngineState::Running);

        self.0
            .events
            .emit(Event::IdentityLoaded { fingerprint: fingerprint.clone() })
            .await;
        self.0.events.emit(Event::DhtConnected).await;

        Ok(fingerprint)
    }

    async fn install_receive_callback(
        &self,
        loaded: Arc<LoadedIdentity>,
        dht: SharedDht,
        transport: Arc<Transport>,
    ) {
        let cache = self.0.cache.clone();
        let events = self.0.events.clone();
        transport
            .set_callback(Box::new(move |sender_hint, bytes| {
                let loaded = loaded.clone();
                let dht = dht.clone();
                let cache = cache.clone();
                let events = events.clone();
                tokio::spawn(async move {
                    // Advisory only (spec 4.4) — a seed for DHT lookup in
                    // `receive_envelope`, never trusted as the sender.
                    let hint = sender_hint.as_deref().and_then(|s| Fingerprint::parse(s).ok());
                    if let Err(e) = dispatch_inbound(&loaded, &dht, &cache, &events, &bytes, hint.as_ref()).await {
                        log::warn!("failed to process inbound frame: {e}");
                        events.emit(Event::error(e)).await;
                    }
                });
            }))
            .await;
    }

    async fn spawn_background_workers(
        &self,
        loaded: Arc<LoadedIdentity>,
        dht: SharedDht,
        transport: Arc<Transport>,
    ) {
        let mut handles = Vec::new();

        {
            let loaded = loaded.clone();
            let dht = dht.clone();
            let transport = transport.clone();
            let cache = self.0.cache.clone();
            let events = self.0.events.clone();
            let mut rx = self
                .0
                .send_rx
                .lock()
                .await
                .take()
                .expect("send queue worker is started exactly once, at identity load");
            handles.push(tokio::spawn(async move {
                while let Some(job) = rx.recv().await {
                    if let Err(e) = pipeline::send_direct_message(
                        &loaded, &dht, &transport, &cache, &events, job.recipient, job.payload,
                    )
                    .await
                    {
                        log::warn!("queued send failed: {e}");
                        events.emit(Event::error(e)).await;
                    }
                }
            }));
        }

        {
            let loaded = loaded.clone();
            let dht = dht.clone();
            let transport = transport.clone();
            let interval = self.0.config.presence_refresh_interval();
            handles.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.tick().await; // first tick fires immediately; presence was already published once above
                loop {
                    ticker.tick().await;
                    if let Err(e) = publish_presence(&dht, &loaded, &transport).await {
                        log::warn!("presence refresh failed: {e}");
                    }
                }
            }));
        }

        {
            let loaded = loaded.clone();
            let dht = dht.clone();
            let cache = self.0.cache.clone();
            let events = self.0.events.clone();
            let interval = self.0.config.inbox_poll_interval();
            handles.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                loop {
                    ticker.tick().await;
                    if let Err(e) = poll_spillway(&dht, &loaded, &cache, &events).await {
                        log::warn!("offline inbox poll failed: {e}");
                    }
                }
            }));
        }

        {
            let loaded = loaded.clone();
            let dht = dht.clone();
            let interval = self.0.config.presence_refresh_interval();
            handles.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                loop {
                    ticker.tick().await;
                    if let Err(e) = sync_contacts(&dht, &loaded).await {
                        log::warn!("contact sync failed: {e}");
                    }
                }
            }));
        }

        self.0.workers.lock().await.extend(handles);
    }

    // ---- messaging -----------------------------------------------------

    /// Queue a chat message for `recipient` and return once it is accepted
    /// onto the bounded send queue (spec 6's `send_message`). The actual
    /// delivery attempt happens on the send worker; watch
    /// `Event::MessageStatusChanged` for the outcome.
    pub async fn send_message(&self, recipient: Fingerprint, text: &str) -> EngineResult<()> {
        self.queue_message(recipient, PlaintextPayload::Chat(text.to_string())).await
    }

    /// Queue an arbitrary plaintext payload (chat, receipt, or invitation)
    /// for 1:1 delivery.
    pub async fn queue_message(&self, recipient: Fingerprint, payload: PlaintextPayload) -> EngineResult<()> {
        self.require_loaded().await?;
        self.0
            .send_tx
            .try_send(SendJob { recipient, payload })
            .map_err(|_| EngineError::Busy)
    }

    pub async fn get_conversation(&self, contact: &Fingerprint) -> EngineResult<Vec<Message>> {
        let loaded = self.require_loaded().await?;
        Ok(loaded.messages.conversation(contact))
    }

    pub async fn get_group_conversation(&self, group_id: Uuid) -> EngineResult<Vec<Message>> {
        let loaded = self.require_loaded().await?;
        Ok(loaded.messages.group_conversation(&group_id))
    }

    /// Force an immediate offline-inbox poll rather than waiting for the
    /// background worker's next tick, returning how many new messages it
    /// ingested (spec 6's `check_offline_messages`).
    pub async fn check_offline_messages(&self) -> EngineResult<usize> {
        let loaded = self.require_loaded().await?;
        let dht = self.require_dht().await?;
        poll_spillway(&dht, &loaded, &self.0.cache, &self.0.events).await
    }

    // ---- contacts --------------------------------------------------------

    /// Look up `fingerprint`'s public keys and add it as a contact. Errors
    /// `AlreadyExists` if the fingerprint is already a contact, rather than
    /// the generic parse-error the underlying store would otherwise surface
    /// (spec 7).
    pub async fn add_contact(&self, fingerprint: Fingerprint) -> EngineResult<Contact> {
        let loaded = self.require_loaded().await?;
        let dht = self.require_dht().await?;
        if loaded.contacts.get(&fingerprint).is_some() {
            return Err(EngineError::AlreadyExists(format!("contact {fingerprint} already exists")));
        }
        let keys = pipeline::lookup_public_keys(&dht, &self.0.cache, &fingerprint).await?;
        let mut contact = Contact::new(fingerprint);
        contact.refresh_keys(&keys.signing, &keys.encryption);
        loaded.contacts.add(contact.clone()).map_err(EngineError::from)?;
        Ok(contact)
    }

    pub async fn get_contact(&self, fingerprint: &Fingerprint) -> EngineResult<Option<Contact>> {
        let loaded = self.require_loaded().await?;
        Ok(loaded.contacts.get(fingerprint))
    }

    pub async fn remove_contact(&self, fingerprint: &Fingerprint) -> EngineResult<()> {
        let loaded = self.require_loaded().await?;
        loaded.contacts.remove(fingerprint).map_err(EngineError::from)
    }

    // ---- presence and naming --------------------------------------------

    pub async fn refresh_presence(&self) -> EngineResult<()> {
        let loaded = self.require_loaded().await?;
        let dht = self.require_dht().await?;
        let transport = self.require_transport().await?;
        publish_presence(&dht, &loaded, &transport).await
    }

    pub async fn is_peer_online(&self, fingerprint: &Fingerprint) -> EngineResult<bool> {
        let dht = self.require_dht().await?;
        match dht.get(&keys::presence_record(fingerprint)).await {
            Ok(values) => Ok(!values.is_empty()),
            Err(DhtError::NotFound) => Ok(false),
            Err(e) => Err(EngineError::from(e)),
        }
    }

    pub async fn lookup_presence(&self, fingerprint: &Fingerprint) -> EngineResult<Option<PresenceRecord>> {
        let dht = self.require_dht().await?;
        match dht.get(&keys::presence_record(fingerprint)).await {
            Ok(values) => match values.into_iter().next() {
                Some(v) => Ok(Some(
                    bincode::deserialize(&v.payload.body).map_err(|e| EngineError::Storage(e.to_string()))?,
                )),
                None => Ok(None),
            },
            Err(DhtError::NotFound) => Ok(None),
            Err(e) => Err(EngineError::from(e)),
        }
    }

    /// Claim a human-readable name for the loaded identity (spec 4.3's
    /// first-writer-wins name record). Fails `AlreadyExists` if another
    /// fingerprint already holds it.
    pub async fn register_name(&self, name: &str) -> EngineResult<()> {
        let loaded = self.require_loaded().await?;
        let dht = self.require_dht().await?;
        let year = std::time::Duration::from_secs(365 * 24 * 60 * 60);

        let forward = NameForwardRecord {
            name: name.to_string(),
            fingerprint: loaded.identity.fingerprint.clone(),
        };
        let body = bincode::serialize(&forward).map_err(|e| EngineError::Storage(e.to_string()))?;
        let payload = SignedPayload::sign(PayloadTag::NameForward, body, &loaded.identity.signing);
        dht.put(
            keys::name_forward_record(name),
            DhtValue {
                payload,
                publisher: loaded.identity.fingerprint.clone(),
                publish_timestamp: chrono::Utc::now(),
                ttl: year,
            },
        )
        .await
        .map_err(|e| match e {
            DhtError::OwnerConflict => EngineError::AlreadyExists(format!("name '{name}' is already registered")),
            other => EngineError::from(other),
        })?;

        let reverse = NameReverseRecord {
            fingerprint: loaded.identity.fingerprint.clone(),
            name: name.to_string(),
        };
        let body = bincode::serialize(&reverse).map_err(|e| EngineError::Storage(e.to_string()))?;
        let payload = SignedPayload::sign(PayloadTag::NameReverse, body, &loaded.identity.signing);
        dht.put(
            keys::name_reverse_record(&loaded.identity.fingerprint),
            DhtValue {
                payload,
                publisher: loaded.identity.fingerprint.clone(),
                publish_timestamp: chrono::Utc::now(),
                ttl: year,
            },
        )
        .await
        .map_err(EngineError::from)
    }

    pub async fn lookup_name(&self, name: &str) -> EngineResult<Option<Fingerprint>> {
        let dht = self.require_dht().await?;
        match dht.get(&keys::name_forward_record(name)).await {
            Ok(values) => match values.into_iter().next() {
                Some(v) => {
                    let record: NameForwardRecord =
                        bincode::deserialize(&v.payload.body).map_err(|e| EngineError::Storage(e.to_string()))?;
                    Ok(Some(record.fingerprint))
                }
                None => Ok(None),
            },
            Err(DhtError::NotFound) => Ok(None),
            Err(e) => Err(EngineError::from(e)),
        }
    }

    // ---- groups ----------------------------------------------------------

    /// Create a new group owned by this identity, mint its first GSK, and
    /// publish the meta record plus one capsule per initial member (spec
    /// 4.5).
    pub async fn create_group(&self, name: &str, members: Vec<Fingerprint>) -> EngineResult<Uuid> {
        let loaded = self.require_loaded().await?;
        let dht = self.require_dht().await?;

        let group_id = crate::crypto::primitives::secure_uuid_v4().map_err(EngineError::from)?;
        let gsk_id = crate::crypto::primitives::secure_uuid_v4().map_err(EngineError::from)?;
        let gsk = groups::generate_gsk().map_err(EngineError::from)?;

        let mut all_members = members.clone();
        if !all_members.iter().any(|m| m == &loaded.identity.fingerprint) {
            all_members.push(loaded.identity.fingerprint.clone());
        }

        let group = Group {
            id: group_id,
            name: name.to_string(),
            creator: loaded.identity.fingerprint.clone(),
            members: all_members.clone(),
            created_at: chrono::Utc::now(),
            active_gsk: GroupSymmetricKey { gsk_id, key: gsk },
            ownership_expires_at: chrono::Utc::now()
                + chrono::Duration::seconds(Group::OWNERSHIP_TOKEN_LIFETIME_SECS),
        };
        loaded.groups.upsert_group(group.clone()).map_err(EngineError::from)?;
        loaded
            .groups
            .set_membership(GroupMembership { group_id, state: MembershipState::Owner })
            .map_err(EngineError::from)?;

        self.publish_group_meta(&dht, &loaded, &group).await?;
        self.publish_gsk_capsules(&dht, &loaded, &group, &all_members, gsk_id, &gsk).await?;

        for member in members.iter().filter(|m| *m != &loaded.identity.fingerprint) {
            let invitation =
                PlaintextPayload::GroupInvitation(payload::GroupInvitationPayload {
                    group_id,
                    group_name: name.to_string(),
                });
            let _ = self.queue_message(member.clone(), invitation).await;
        }

        Ok(group_id)
    }

    async fn publish_group_meta(&self, dht: &SharedDht, loaded: &LoadedIdentity, group: &Group) -> EngineResult<()> {
        let record = GroupMetaRecord {
            group_id: group.id,
            name: group.name.clone(),
            creator: group.creator.clone(),
            members: group.members.clone(),
            active_gsk_id: group.active_gsk.gsk_id,
            updated_at: chrono::Utc::now(),
        };
        let body = bincode::serialize(&record).map_err(|e| EngineError::Storage(e.to_string()))?;
        let payload = SignedPayload::sign(PayloadTag::GroupMeta, body, &loaded.identity.signing);
        let value = DhtValue {
            payload,
            publisher: loaded.identity.fingerprint.clone(),
            publish_timestamp: chrono::Utc::now(),
            ttl: std::time::Duration::from_secs(Group::OWNERSHIP_TOKEN_LIFETIME_SECS as u64),
        };
        dht.put(keys::group_meta_record(&group.id), value).await.map_err(EngineError::from)
    }

    async fn publish_gsk_capsules(
        &self,
        dht: &SharedDht,
        loaded: &LoadedIdentity,
        group: &Group,
        members: &[Fingerprint],
        gsk_id: Uuid,
        gsk: &[u8; crate::crypto::DEK_LEN],
    ) -> EngineResult<()> {
        for member in members {
            let member_keys = pipeline::lookup_public_keys(dht, &self.0.cache, member).await?;
            let (kem_ciphertext, wrapped_key) =
                groups::build_capsule(&member_keys.encryption, gsk).map_err(EngineError::from)?;
            let record = GroupKeyCapsuleRecord {
                group_id: group.id,
                member: member.clone(),
                gsk_id,
                kem_ciphertext,
                wrapped_key,
            };
            let body = bincode::serialize(&record).map_err(|e| EngineError::Storage(e.to_string()))?;
            let payload = SignedPayload::sign(PayloadTag::GroupKeyCapsule, body, &loaded.identity.signing);
            let value = DhtValue {
                payload,
                publisher: loaded.identity.fingerprint.clone(),
                publish_timestamp: chrono::Utc::now(),
                ttl: std::time::Duration::from_secs(Group::OWNERSHIP_TOKEN_LIFETIME_SECS as u64),
            };
            dht.put(keys::group_key_capsule_record(&group.id, member), value)
                .await
                .map_err(EngineError::from)?;
        }
        Ok(())
    }

    /// Remove `member` from `group`, rotating the GSK and republishing meta
    /// plus fresh capsules for the remaining members. The removed member is
    /// given no new capsule, so any later group message they see fails to
    /// decrypt under their stale GSK (spec 8, scenario 5). Only the group's
    /// creator may call this.
    pub async fn remove_group_member(&self, group_id: Uuid, member: Fingerprint) -> EngineResult<()> {
        let loaded = self.require_loaded().await?;
        let dht = self.require_dht().await?;

        let mut group = loaded.groups.get_group(&group_id).ok_or(EngineError::UnknownRecipient)?;
        if group.creator != loaded.identity.fingerprint {
            return Err(EngineError::Permission("only the group creator may remove a member".into()));
        }
        group.members.retain(|m| m != &member);

        let new_gsk_id = crate::crypto::primitives::secure_uuid_v4().map_err(EngineError::from)?;
        let new_gsk = groups::generate_gsk().map_err(EngineError::from)?;
        group.active_gsk = GroupSymmetricKey { gsk_id: new_gsk_id, key: new_gsk };
        loaded.groups.upsert_group(group.clone()).map_err(EngineError::from)?;

        self.publish_group_meta(&dht, &loaded, &group).await?;
        let remaining = group.members.clone();
        self.publish_gsk_capsules(&dht, &loaded, &group, &remaining, new_gsk_id, &new_gsk).await?;

        self.0.events.emit(Event::GroupMemberLeft { group_id, member }).await;
        Ok(())
    }

    /// Accept a pending group invitation: flip the local membership record
    /// to `Member` and pull the current meta record plus this identity's
    /// own GSK capsule so it can decrypt subsequent messages.
    pub async fn accept_invitation(&self, group_id: Uuid) -> EngineResult<()> {
        let loaded = self.require_loaded().await?;
        let dht = self.require_dht().await?;

        let mut membership = loaded.groups.get_membership(&group_id).ok_or(EngineError::NotRecipient)?;
        membership.accept().map_err(|e| EngineError::Permission(e.to_string()))?;
        loaded.groups.set_membership(membership).map_err(EngineError::from)?;

        if let Ok(values) = dht.get(&keys::group_meta_record(&group_id)).await {
            if let Some(latest) = values.into_iter().max_by_key(|v| v.publish_timestamp) {
                if let Ok(meta) = bincode::deserialize::<GroupMetaRecord>(&latest.payload.body) {
                    if let Some(key) = self
                        .fetch_own_capsule(&dht, &loaded, group_id, meta.active_gsk_id)
                        .await
                    {
                        let group = Group {
                            id: meta.group_id,
                            name: meta.name,
                            creator: meta.creator,
                            members: meta.members,
                            created_at: chrono::Utc::now(),
                            active_gsk: GroupSymmetricKey { gsk_id: meta.active_gsk_id, key },
                            ownership_expires_at: chrono::Utc::now()
                                + chrono::Duration::seconds(Group::OWNERSHIP_TOKEN_LIFETIME_SECS),
                        };
                        loaded.groups.upsert_group(group).map_err(EngineError::from)?;
                    }
                }
            }
        }
        Ok(())
    }

    async fn fetch_own_capsule(
        &self,
        dht: &SharedDht,
        loaded: &LoadedIdentity,
        group_id: Uuid,
        gsk_id: Uuid,
    ) -> Option<[u8; crate::crypto::DEK_LEN]> {
        let key = keys::group_key_capsule_record(&group_id, &loaded.identity.fingerprint);
        let values = dht.get(&key).await.ok()?;
        let value = values.into_iter().find(|v| {
            bincode::deserialize::<GroupKeyCapsuleRecord>(&v.payload.body)
                .map(|r| r.gsk_id == gsk_id)
                .unwrap_or(false)
        })?;
        let record: GroupKeyCapsuleRecord = bincode::deserialize(&value.payload.body).ok()?;
        groups::open_capsule(&loaded.identity.encryption, &record.kem_ciphertext, &record.wrapped_key).ok()
    }

    /// Reject a pending group invitation by dropping the local membership
    /// row entirely (spec 4.5: the identity never joined, so there is
    /// nothing to persist).
    pub async fn reject_invitation(&self, group_id: Uuid) -> EngineResult<()> {
        let loaded = self.require_loaded().await?;
        loaded.groups.remove_membership(&group_id).map_err(EngineError::from)
    }

    /// Encrypt `text` under the group's current GSK and hand it to the
    /// transport for delivery to every member individually (spec 4.5: the
    /// frame itself is shared, but delivery is still per-recipient over the
    /// same three-tier transport as 1:1 messages).
    pub async fn send_group_message(&self, group_id: Uuid, text: &str) -> EngineResult<()> {
        let loaded = self.require_loaded().await?;
        let dht = self.require_dht().await?;
        let transport = self.require_transport().await?;

        let group = loaded.groups.get_group(&group_id).ok_or(EngineError::UnknownRecipient)?;
        let payload = PlaintextPayload::Chat(text.to_string());
        let encoded = payload.encode();
        let wire = groups::GroupMessageFrame::encrypt(
            group_id,
            group.active_gsk.gsk_id,
            &group.active_gsk.key,
            loaded.identity.fingerprint.clone(),
            &loaded.identity.signing,
            &encoded,
        )
        .map_err(EngineError::from)?;

        let signature_hash = crate::crypto::primitives::sha3_256(&wire);
        let id = loaded.messages.next_id();
        let message = Message {
            id,
            sender: loaded.identity.fingerprint.clone(),
            recipient: Recipient::Group(group_id),
            plaintext: text.to_string(),
            timestamp: chrono::Utc::now(),
            status: MessageStatus::Pending,
            direction: Direction::Outgoing,
            kind: MessageKind::Chat,
            signature_hash,
        };
        loaded.messages.insert(message).map_err(EngineError::from)?;

        let mut any_failed = false;
        for member in group.members.iter().filter(|m| *m != &loaded.identity.fingerprint) {
            if transport.deliver(member, wire.clone()).await.is_err() {
                any_failed = true;
            }
        }
        let status = if any_failed { MessageStatus::Failed } else { MessageStatus::Sent };
        loaded.messages.update_status(id, status).map_err(EngineError::from)?;
        self.0.events.emit(Event::MessageStatusChanged { id, status }).await;
        Ok(())
    }

    // ---- lifecycle ---------------------------------------------------

    pub async fn get_fingerprint(&self) -> EngineResult<Fingerprint> {
        let loaded = self.require_loaded().await?;
        Ok(loaded.identity.fingerprint.clone())
    }

    pub fn state_snapshot(&self) -> EngineState {
        self.state()
    }

    /// Tear the engine down: stop every background worker, drop the
    /// transport, clear the event callback, and advance to `Terminated`.
    pub async fn destroy(&self) -> EngineResult<()> {
        self.set_state(EngineState::ShuttingDown);

        if let Some(transport) = self.0.transport.write().await.take() {
            transport.shutdown().await;
        }
        {
            let mut handles = self.0.workers.lock().await;
            for handle in handles.drain(..) {
                handle.abort();
            }
        }
        self.0.events.clear().await;
        *self.0.identity.write().await = None;
        *self.0.dht.write().await = None;

        self.set_state(EngineState::Terminated);
        Ok(())
    }

    // ---- internal helpers ----------------------------------------------

    fn state(&self) -> EngineState {
        *self.0.state.lock().unwrap()
    }

    fn set_state(&self, next: EngineState) {
        let mut guard = self.0.state.lock().unwrap();
        if !guard.can_advance_to(next) {
            log::warn!("illegal engine state transition {:?} -> {:?}", *guard, next);
        }
        *guard = next;
    }

    async fn require_loaded(&self) -> EngineResult<Arc<LoadedIdentity>> {
        self.0.identity.read().await.clone().ok_or(EngineError::NotInitialized)
    }

    async fn require_dht(&self) -> EngineResult<SharedDht> {
        self.0.dht.read().await.clone().ok_or(EngineError::NotInitialized)
    }

    async fn require_transport(&self) -> EngineResult<Arc<Transport>> {
        self.0.transport.read().await.clone().ok_or(EngineError::NotInitialized)
    }
}

/// Publish (or refresh) this identity's presence beacon, using the
/// transport's locally bound address as its one address hint (spec 4.5).
async fn publish_presence(dht: &SharedDht, loaded: &LoadedIdentity, transport: &Transport) -> EngineResult<()> {
    let mut addr_hints = Vec::new();
    if let Ok(addr) = transport.local_addr() {
        addr_hints.push(addr.to_string());
    }
    let record = PresenceRecord {
        fingerprint: loaded.identity.fingerprint.clone(),
        addr_hints,
        last_refreshed: chrono::Utc::now(),
    };
    let body = bincode::serialize(&record).map_err(|e| EngineError::Storage(e.to_string()))?;
    let payload = SignedPayload::sign(PayloadTag::Presence, body, &loaded.identity.signing);
    let value = DhtValue {
        payload,
        publisher: loaded.identity.fingerprint.clone(),
        publish_timestamp: chrono::Utc::now(),
        ttl: crate::network::dht::PRESENCE_TTL,
    };
    dht.put(keys::presence_record(&loaded.identity.fingerprint), value)
        .await
        .map_err(EngineError::from)
}

/// Drain every envelope queued for this identity at its spillway key,
/// processing each through the same dispatch path as a live inbound frame,
/// then clear the key (spec 4.4 tier 3: "recipient clears their own
/// spillway inbox after fetch"). Returns how many distinct frames were
/// seen (including ones already ingested, since the idempotence check
/// lives downstream in the dispatch functions themselves).
async fn poll_spillway(
    dht: &SharedDht,
    loaded: &LoadedIdentity,
    cache: &PublicKeyCache,
    events: &SharedEventCallback,
) -> EngineResult<usize> {
    let key = keys::spillway_record(&loaded.identity.fingerprint);
    let values = match dht.get(&key).await {
        Ok(values) => values,
        Err(DhtError::NotFound) => return Ok(0),
        Err(e) => return Err(EngineError::from(e)),
    };

    let mut count = 0;
    for value in &values {
        let record: crate::network::dht::records::SpillwayRecord =
            match bincode::deserialize(&value.payload.body) {
                Ok(r) => r,
                Err(_) => continue,
            };
        if let Err(e) =
            dispatch_inbound(loaded, dht, cache, events, &record.envelope_bytes, Some(&value.publisher)).await
        {
            log::warn!("failed to process spillway-queued frame: {e}");
        }
        count += 1;
    }

    if count > 0 {
        dht.remove(&key, &loaded.identity.fingerprint)
            .await
            .map_err(EngineError::from)?;
    }
    Ok(count)
}

/// Re-publish this identity's contact-directory summary, then ingest
/// whatever is currently published under the same key (spec 4.5's
/// contact-sync worker, which exists to let a second device loading the
/// same identity recover its contact list from the network rather than
/// only from local disk). Publish-then-ingest rather than ingest-then-
/// publish so a first run with an empty local store still converges onto
/// whatever a prior device already published, instead of overwriting it.
async fn sync_contacts(dht: &SharedDht, loaded: &LoadedIdentity) -> EngineResult<()> {
    let fingerprints: Vec<Fingerprint> = loaded.contacts.list().into_iter().map(|c| c.fingerprint).collect();
    let summary = ContactDirectorySummary { fingerprints };
    let plaintext = bincode::serialize(&summary).map_err(|e| EngineError::Storage(e.to_string()))?;

    let own_encryption_key = loaded.identity.encryption.public_key().clone();
    let wire = crate::crypto::Envelope::encrypt(&plaintext, &[own_encryption_key], &loaded.identity.signing)
        .map_err(EngineError::from)?;

    let record = crate::network::dht::records::ContactDirectoryRecord {
        fingerprint: loaded.identity.fingerprint.clone(),
        encrypted_envelope: wire,
        updated_at: chrono::Utc::now(),
    };
    let body = bincode::serialize(&record).map_err(|e| EngineError::Storage(e.to_string()))?;
    let payload = SignedPayload::sign(PayloadTag::ContactDirectory, body, &loaded.identity.signing);
    let value = DhtValue {
        payload,
        publisher: loaded.identity.fingerprint.clone(),
        publish_timestamp: chrono::Utc::now(),
        ttl: std::time::Duration::from_secs(30 * 24 * 60 * 60),
    };
    dht.put(keys::contact_directory_record(&loaded.identity.fingerprint), value)
        .await
        .map_err(EngineError::from)?;

    ingest_contact_directory(dht, loaded).await
}

/// Fetch this identity's own self-addressed contact-directory record back
/// from the DHT, decrypt it, and merge any fingerprints it lists that are
/// not yet in the local contact store. A merge rather than a replace:
/// entries added locally since the last publish must survive a round-trip.
/// Best-effort — nothing here is fatal to the contact-sync worker tick.
async fn ingest_contact_directory(dht: &SharedDht, loaded: &LoadedIdentity) -> EngineResult<()> {
    let key = keys::contact_directory_record(&loaded.identity.fingerprint);
    let values = match dht.get(&key).await {
        Ok(values) => values,
        Err(DhtError::NotFound) => return Ok(()),
        Err(e) => return Err(EngineError::from(e)),
    };
    let Some(value) = values.into_iter().next() else {
        return Ok(());
    };
    let record: crate::network::dht::records::ContactDirectoryRecord =
        match bincode::deserialize(&value.payload.body) {
            Ok(r) => r,
            Err(_) => return Ok(()),
        };

    let envelope = match crate::crypto::Envelope::parse(&record.encrypted_envelope) {
        Ok(e) => e,
        Err(_) => return Ok(()),
    };
    let plaintext = match envelope.decrypt_for(&loaded.identity.encryption) {
        Ok(p) => p,
        Err(_) => return Ok(()),
    };
    let summary: ContactDirectorySummary = match bincode::deserialize(&plaintext) {
        Ok(s) => s,
        Err(_) => return Ok(()),
    };

    for fingerprint in summary.fingerprints {
        if fingerprint == loaded.identity.fingerprint {
            continue;
        }
        if loaded.contacts.get(&fingerprint).is_some() {
            continue;
        }
        let contact = Contact::new(fingerprint);
        let _ = loaded.contacts.add(contact);
    }
    Ok(())
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct ContactDirectorySummary {
    fingerprints: Vec<Fingerprint>,
}

/// Disambiguate an inbound wire frame between the 1:1 envelope format and
/// the group-message format, both of which ride the same
/// `transport.deliver()` call and callback (spec 4.2 vs 4.5). The envelope
/// format always starts with its 8-byte magic tag; a group frame, being a
/// bare bincode struct, essentially never collides with it.
async fn dispatch_inbound(
    loaded: &LoadedIdentity,
    dht: &SharedDht,
    cache: &PublicKeyCache,
    events: &SharedEventCallback,
    bytes: &[u8],
    sender_hint: Option<&Fingerprint>,
) -> EngineResult<()> {
    if bytes.starts_with(&crate::crypto::envelope::MAGIC) {
        pipeline::receive_envelope(loaded, dht, cache, events, bytes, sender_hint).await
    } else {
        // Group frames carry their own signed sender preamble (spec 4.5);
        // no hint needed.
        receive_group_frame(loaded, dht, cache, events, bytes).await
    }
}

/// The group-chat receive pipeline (spec 4.5), mirroring
/// [`pipeline::receive_envelope`]'s shape: parse, verify membership and key
/// generation, decrypt, check idempotence, store, emit.
async fn receive_group_frame(
    loaded: &LoadedIdentity,
    dht: &SharedDht,
    cache: &PublicKeyCache,
    events: &SharedEventCallback,
    wire: &[u8],
) -> EngineResult<()> {
    let frame = groups::GroupMessageFrame::parse(wire)?;
    let (group_id, _gsk_id, sender) = frame.preamble()?;

    let membership = loaded.groups.get_membership(&group_id);
    if !matches!(
        membership.map(|m| m.state),
        Some(MembershipState::Member) | Some(MembershipState::Owner)
    ) {
        return Err(EngineError::NotRecipient);
    }
    let group = loaded.groups.get_group(&group_id).ok_or(EngineError::UnknownRecipient)?;

    let sender_keys = pipeline::lookup_public_keys(dht, cache, &sender).await?;
    let plaintext = frame.open(&group.active_gsk.key, &sender_keys.signing)?;

    let signature_hash = crate::crypto::primitives::sha3_256(wire);
    if loaded.messages.has_signature(&signature_hash) {
        return Ok(());
    }

    let payload = PlaintextPayload::decode(&plaintext)
        .map_err(|e| EngineError::Crypto(format!("malformed group plaintext payload: {e}")))?;

    if let PlaintextPayload::Chat(text) = payload {
        let id = loaded.messages.next_id();
        let message = Message {
            id,
            sender,
            recipient: Recipient::Group(group_id),
            plaintext: text,
            timestamp: chrono::Utc::now(),
            status: MessageStatus::Delivered,
            direction: Direction::Incoming,
            kind: MessageKind::Chat,
            signature_hash,
        };
        loaded.messages.insert(message.clone()).map_err(EngineError::from)?;
        events.emit(Event::MessageReceived { message: Box::new(message) }).await;
    }
    Ok(())
}
