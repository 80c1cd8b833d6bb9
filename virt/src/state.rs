//! The multiplexer core and readiness coordinator, bundled into one
//! owned value with a single mutable entry point.
//!
//! Every piece of process-wide state the original scatters across
//! file-level variables — the bookkeeping table, the allocators, the
//! MBR record, the discovery in-flight flag, the readiness tag — lives
//! here instead, so `notified` is the only place that ever touches it.

use alloc::vec;
use alloc::vec::Vec;

use blk_queue::{Code, QueuePair, Request, Response, Status};
use bounce_pool::BouncePool;
use ialloc::IndexAllocator;

use crate::channel::{DriverInfo, Event, Notifier};
use crate::config::Config;
use crate::dma::{CacheMaintenance, DmaRegion, DmaTranslator};
use crate::error::{DiscoveryError, Error, ValidationError};
use crate::mbr;
use crate::storage_info::StorageInfo;
use crate::translate::ClientDescriptor;

/// Readiness lifecycle (§4.7). `Inactive` and `Ready` are steady
/// states; `Bringup` is only ever entered and left within
/// [`VirtState::notified`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VirtStatus {
    Inactive,
    Bringup,
    Ready,
}

/// Bookkeeping kept per in-flight driver request, addressed by the
/// driver-side request ID the index allocator handed out.
#[derive(Debug, Clone, Copy)]
struct Reqbk {
    cli_id: usize,
    cli_req_id: u32,
    /// Byte offset of the request's payload within the client's own
    /// data region (READ/WRITE only).
    cli_offset: u64,
    /// Bounce-buffer base address within the driver data region
    /// (READ/WRITE only; 0 for FLUSH/BARRIER).
    drv_addr: usize,
    count: u16,
    code: Code,
}

/// MBR discovery's two-phase in-flight state (§4.4).
#[derive(Debug, Default)]
struct Discovery {
    sent_request: bool,
    mbr_req_addr: Option<usize>,
    mbr_req_id: Option<u32>,
}

/// Owned state for one virtualiser instance.
pub struct VirtState {
    config: Config,
    status: VirtStatus,

    driver_info: DriverInfo,
    clients: Vec<ClientDescriptor>,
    client_storage: Vec<StorageInfo>,

    driver_queue: QueuePair,
    client_queues: Vec<QueuePair>,

    driver_data: DmaRegion,
    client_data: Vec<DmaRegion>,
    translator: DmaTranslator,

    bounce_pool: BouncePool,
    ialloc: IndexAllocator,
    reqbk: Vec<Option<Reqbk>>,

    discovery: Discovery,
    mbr: Option<mbr::Mbr>,
}

impl VirtState {
    /// Builds a fresh instance in `Inactive` state. `client_data_sizes`
    /// gives the byte size of each client's own data region, in
    /// client order. `driver_phys_base` is the physical address the
    /// start of the driver data region maps to, for DMA translation.
    #[must_use]
    pub fn new(config: Config, driver_phys_base: u64, client_data_sizes: &[usize]) -> Self {
        assert_eq!(client_data_sizes.len(), config.num_clients);

        let reqbk_size = config.reqbk_size();
        let num_buffers_driv = config.num_buffers_driv();
        let driver_data = DmaRegion::new(config.blk_data_region_size_driv);
        let translator = DmaTranslator::new(0, driver_phys_base);

        Self {
            client_queues: (0..config.num_clients)
                .map(|_| QueuePair::new(config.blk_queue_size_driv, config.blk_queue_size_driv))
                .collect(),
            client_data: client_data_sizes.iter().copied().map(DmaRegion::new).collect(),
            client_storage: (0..config.num_clients).map(|_| StorageInfo::default()).collect(),
            clients: vec![ClientDescriptor::default(); config.num_clients],
            driver_queue: QueuePair::new(config.blk_queue_size_driv, config.blk_queue_size_driv),
            driver_data,
            translator,
            bounce_pool: BouncePool::new(0, config.transfer_size as usize, num_buffers_driv),
            ialloc: IndexAllocator::new(reqbk_size as u32),
            reqbk: vec![None; reqbk_size],
            discovery: Discovery::default(),
            mbr: None,
            driver_info: DriverInfo::default(),
            status: VirtStatus::Inactive,
            config,
        }
    }

    #[must_use]
    pub fn status(&self) -> VirtStatus {
        self.status
    }

    /// # Errors
    ///
    /// Returns [`Error::UnknownClient`] if `client` is outside the
    /// configured range.
    pub fn client_storage(&self, client: usize) -> Result<&StorageInfo, Error> {
        self.client_storage.get(client).ok_or(Error::UnknownClient(client))
    }

    /// # Errors
    ///
    /// Returns [`Error::UnknownClient`] if `client` is outside the
    /// configured range.
    pub fn client_queue(&mut self, client: usize) -> Result<&mut QueuePair, Error> {
        self.client_queues.get_mut(client).ok_or(Error::UnknownClient(client))
    }

    /// # Errors
    ///
    /// Returns [`Error::UnknownClient`] if `client` is outside the
    /// configured range.
    pub fn client_data(&mut self, client: usize) -> Result<&mut DmaRegion, Error> {
        self.client_data.get_mut(client).ok_or(Error::UnknownClient(client))
    }

    /// The single entry point: dispatches one event to completion.
    /// Never blocks; every operation that would require waiting
    /// instead leaves its work for the next call.
    pub fn notified(&mut self, event: Event, notifier: &mut impl Notifier) {
        match event {
            Event::StateChange(info) => self.on_state_change(info, notifier),
            Event::Driver => self.on_driver_event(notifier),
            Event::Client(_) => self.on_client_event(notifier),
        }
    }

    fn on_state_change(&mut self, info: DriverInfo, notifier: &mut impl Notifier) {
        self.reset();
        self.driver_info = info;

        if info.ready {
            self.status = VirtStatus::Bringup;
            if self.policy_init(notifier) {
                // Keep in sync with the Bringup branch of `on_driver_event`.
                self.status = VirtStatus::Ready;
                self.notify_clients_state(true);
            }
        } else {
            self.status = VirtStatus::Inactive;
            self.notify_clients_state(false);
        }
    }

    fn on_driver_event(&mut self, notifier: &mut impl Notifier) {
        match self.status {
            VirtStatus::Bringup => {
                if self.policy_init(notifier) {
                    // Keep in sync with `on_state_change`.
                    self.status = VirtStatus::Ready;
                    self.notify_clients_state(true);
                }
            }
            VirtStatus::Ready => self.handle_driver_queue(notifier),
            VirtStatus::Inactive => {}
        }
    }

    fn on_client_event(&mut self, notifier: &mut impl Notifier) {
        if self.status != VirtStatus::Ready {
            return;
        }
        for cli_id in 0..self.config.num_clients {
            self.handle_client(cli_id, notifier);
        }
        notifier.notify_driver();
    }

    fn notify_clients_state(&mut self, ready: bool) {
        for info in &self.client_storage {
            info.set_ready(ready);
        }
    }

    /// Clears every piece of per-episode state ahead of a fresh
    /// discovery attempt (§4.7 reset list).
    fn reset(&mut self) {
        let reqbk_size = self.config.reqbk_size();
        let num_buffers_driv = self.config.num_buffers_driv();

        self.reqbk = vec![None; reqbk_size];
        self.ialloc = IndexAllocator::new(reqbk_size as u32);
        self.bounce_pool = BouncePool::new(0, self.config.transfer_size as usize, num_buffers_driv);
        self.clients = vec![ClientDescriptor::default(); self.config.num_clients];
        self.mbr = None;
        self.discovery = Discovery::default();
    }

    // ---- MBR discovery (§4.4) ----

    /// Drives the two-phase discovery state machine one step.
    /// Returns `true` once partitions are parsed and published.
    fn policy_init(&mut self, notifier: &mut impl Notifier) -> bool {
        if !self.discovery.sent_request {
            self.request_mbr(notifier);
            return false;
        }

        let sector = match self.handle_mbr_reply() {
            Ok(Some(sector)) => sector,
            Ok(None) => return false,
            Err(e) => {
                log::warn!("MBR discovery failed: {e}");
                return false;
            }
        };

        match self.apply_mbr(&sector) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("MBR discovery failed: {e}");
                false
            }
        }
    }

    fn request_mbr(&mut self, notifier: &mut impl Notifier) {
        let Ok(addr) = self.bounce_pool.alloc(1) else {
            log::error!("mbr: bounce pool exhausted on a fresh reset, this should never happen");
            return;
        };
        let Ok(id) = self.ialloc.alloc() else {
            self.bounce_pool.free(addr, 1);
            log::error!("mbr: index allocator exhausted on a fresh reset, this should never happen");
            return;
        };

        let phys = self.translator.to_physical(addr as u64);
        let req = Request {
            code: Code::Read as u8,
            addr: phys,
            block_number: 0,
            count: 1,
            id,
        };
        if self.driver_queue.enqueue_req(req).is_err() {
            self.ialloc.free(id).expect("id just allocated");
            self.bounce_pool.free(addr, 1);
            log::error!("mbr: driver queue full on a fresh reset, this should never happen");
            return;
        }

        self.discovery.sent_request = true;
        self.discovery.mbr_req_addr = Some(addr);
        self.discovery.mbr_req_id = Some(id);
        notifier.notify_driver();
    }

    /// Completes phase 2, returning the 512 raw sector bytes once the
    /// driver's reply arrives. `Ok(None)` means the reply hasn't
    /// shown up yet; try again on the next driver event.
    fn handle_mbr_reply(&mut self) -> Result<Option<[u8; mbr::SECTOR_SIZE]>, DiscoveryError> {
        if self.driver_queue.empty_resp() {
            log::warn!("mbr: notified by driver but response queue is empty");
            return Ok(None);
        }
        let resp = self
            .driver_queue
            .dequeue_resp()
            .expect("checked non-empty above");

        let Some(expected_id) = self.discovery.mbr_req_id else {
            return Ok(None);
        };
        if resp.id != expected_id {
            log::warn!("mbr: reply id {} does not match outstanding request", resp.id);
            return Ok(None);
        }
        self.ialloc.free(resp.id).expect("mbr request id was allocated by us");
        self.discovery.mbr_req_id = None;
        let addr = self
            .discovery
            .mbr_req_addr
            .take()
            .expect("request address is set alongside its id");

        if !matches!(resp.status, Status::Ok) {
            self.bounce_pool.free(addr, 1);
            return Err(DiscoveryError::DriverReadFailed);
        }

        self.driver_data.prepare_for_cpu(addr, mbr::SECTOR_SIZE);
        let mut bytes = [0u8; mbr::SECTOR_SIZE];
        self.driver_data.copy_to(addr, &mut bytes);
        self.bounce_pool.free(addr, 1);
        Ok(Some(bytes))
    }

    fn apply_mbr(&mut self, sector: &[u8]) -> Result<(), DiscoveryError> {
        let mbr = mbr::Mbr::parse(sector)?;
        let partitions = mbr::valid_partitions(&mbr, self.config.sectors_per_transfer())?;

        if partitions.len() < self.config.num_clients {
            return Err(DiscoveryError::NotEnoughPartitions);
        }

        let mut clients = Vec::with_capacity(self.config.num_clients);
        for (cli_id, &partition_idx) in self.config.mapping.iter().enumerate() {
            let slice = partitions
                .get(partition_idx)
                .ok_or(DiscoveryError::BadMapping {
                    client: cli_id,
                    partition: partition_idx,
                })?;
            clients.push(ClientDescriptor {
                start_sector: slice.start_sector,
                sectors: slice.sectors,
            });
        }

        for (cli_id, client) in clients.iter().enumerate() {
            self.client_storage[cli_id] = StorageInfo::new(
                self.driver_info.sector_size,
                client.capacity(self.config.sectors_per_transfer()),
                self.driver_info.read_only,
            );
        }

        self.clients = clients;
        self.mbr = Some(mbr);
        Ok(())
    }

    // ---- Multiplexer core (§4.6) ----

    fn handle_client(&mut self, cli_id: usize, notifier: &mut impl Notifier) {
        loop {
            let Ok(req) = self.client_queues[cli_id].peek_req() else {
                break;
            };

            let Some(code) = Code::from_repr(req.code) else {
                self.client_queues[cli_id]
                    .dequeue_req()
                    .expect("peeked request must still be present");
                let e = ValidationError::UnknownCode { client: cli_id };
                log::warn!("client {cli_id} request rejected: {e}");
                self.respond_invalid(cli_id, req.id, notifier);
                continue;
            };

            match code {
                Code::Read | Code::Write => {
                    if let Err(e) = self.validate_data_request(cli_id, &req) {
                        self.client_queues[cli_id]
                            .dequeue_req()
                            .expect("peeked request must still be present");
                        log::warn!("client {cli_id} request rejected: {e}");
                        self.respond_invalid(cli_id, req.id, notifier);
                        continue;
                    }
                    if self.driver_queue.full_req()
                        || self.ialloc.full()
                        || self.bounce_pool.full(req.count as usize)
                    {
                        break;
                    }
                    self.admit_data_request(cli_id, req, code);
                }
                Code::Flush | Code::Barrier => {
                    if self.driver_queue.full_req() || self.ialloc.full() {
                        break;
                    }
                    self.admit_control_request(cli_id, req, code);
                }
            }
        }
    }

    fn validate_data_request(
        &self,
        cli_id: usize,
        req: &Request,
    ) -> Result<u32, ValidationError> {
        let client = self
            .clients
            .get(cli_id)
            .ok_or(ValidationError::OutOfBounds { client: cli_id })?;
        let drv_block = client.translate(
            cli_id,
            req.block_number,
            req.count,
            self.config.sectors_per_transfer(),
        )?;

        let region_size = self.client_data[cli_id].len() as u64;
        let span = u64::from(self.config.transfer_size) * u64::from(req.count);
        let end = req
            .addr
            .checked_add(span)
            .ok_or(ValidationError::BadOffset { client: cli_id })?;
        if req.addr % u64::from(self.config.transfer_size) != 0 || end > region_size {
            return Err(ValidationError::BadOffset { client: cli_id });
        }
        if req.count == 0 {
            return Err(ValidationError::ZeroCount { client: cli_id });
        }

        Ok(drv_block)
    }

    fn admit_data_request(&mut self, cli_id: usize, req: Request, code: Code) {
        let drv_block = self
            .validate_data_request(cli_id, &req)
            .expect("admission only runs after validation succeeded");
        let drv_addr = self
            .bounce_pool
            .alloc(req.count as usize)
            .expect("admission checked bounce pool capacity");

        if code == Code::Write {
            let len = req.count as usize * self.config.transfer_size as usize;
            let payload = self.client_data[cli_id].slice(req.addr as usize, len).to_vec();
            self.driver_data.copy_from(drv_addr, &payload);
            self.driver_data.prepare_for_device(drv_addr, len);
        }

        let drv_req_id = self
            .ialloc
            .alloc()
            .expect("admission checked index allocator capacity");
        self.reqbk[drv_req_id as usize] = Some(Reqbk {
            cli_id,
            cli_req_id: req.id,
            cli_offset: req.addr,
            drv_addr,
            count: req.count,
            code,
        });

        self.client_queues[cli_id]
            .dequeue_req()
            .expect("peeked request must still be present");

        let phys = self.translator.to_physical(drv_addr as u64);
        self.driver_queue
            .enqueue_req(Request {
                code: req.code,
                addr: phys,
                block_number: drv_block,
                count: req.count,
                id: drv_req_id,
            })
            .expect("admission checked driver queue capacity");
    }

    fn admit_control_request(&mut self, cli_id: usize, req: Request, code: Code) {
        let drv_req_id = self
            .ialloc
            .alloc()
            .expect("admission checked index allocator capacity");
        self.reqbk[drv_req_id as usize] = Some(Reqbk {
            cli_id,
            cli_req_id: req.id,
            cli_offset: req.addr,
            drv_addr: 0,
            count: req.count,
            code,
        });

        self.client_queues[cli_id]
            .dequeue_req()
            .expect("peeked request must still be present");

        self.driver_queue
            .enqueue_req(Request {
                code: req.code,
                addr: 0,
                block_number: 0,
                count: req.count,
                id: drv_req_id,
            })
            .expect("admission checked driver queue capacity");
    }

    fn respond_invalid(&mut self, cli_id: usize, cli_req_id: u32, notifier: &mut impl Notifier) {
        let queue = &mut self.client_queues[cli_id];
        if queue.full_resp() {
            log::debug!("dropping INVALID_PARAM response for client {cli_id}: response queue full");
            return;
        }
        queue
            .enqueue_resp(Response {
                status: Status::InvalidParam,
                success_count: 0,
                id: cli_req_id,
            })
            .expect("checked non-full above");
        notifier.notify_client(cli_id);
    }

    fn handle_driver_queue(&mut self, notifier: &mut impl Notifier) {
        while !self.driver_queue.empty_resp() {
            let resp = self
                .driver_queue
                .dequeue_resp()
                .expect("checked non-empty above");

            let Some(entry) = self.reqbk.get_mut(resp.id as usize).and_then(Option::take) else {
                debug_assert!(false, "driver response id has no bookkeeping entry");
                log::error!("{}", Error::UnknownResponseId(resp.id));
                continue;
            };
            if let Err(e) = self.ialloc.free(resp.id) {
                debug_assert!(false, "double free of driver request id");
                log::error!("{e}");
            }
            if matches!(entry.code, Code::Read | Code::Write) {
                self.bounce_pool.free(entry.drv_addr, entry.count as usize);
            }

            if self.client_queues[entry.cli_id].full_resp() {
                log::debug!(
                    "dropping response for client {}: response queue full",
                    entry.cli_id
                );
                continue;
            }

            let status = if matches!(resp.status, Status::Ok) && entry.code == Code::Read {
                let len = entry.count as usize * self.config.transfer_size as usize;
                self.driver_data.prepare_for_cpu(entry.drv_addr, len);
                let payload = self.driver_data.slice(entry.drv_addr, len).to_vec();
                self.client_data[entry.cli_id].copy_from(entry.cli_offset as usize, &payload);
                Status::Ok
            } else {
                resp.status
            };

            self.client_queues[entry.cli_id]
                .enqueue_resp(Response {
                    status,
                    success_count: resp.success_count,
                    id: entry.cli_req_id,
                })
                .expect("checked non-full above");
            notifier.notify_client(entry.cli_id);
        }
    }
}
