use bt_hci::param::{AddrKind, AdvFilterPolicy, BdAddr};
use embassy_sync::waitqueue::AtomicWaker;
use embassy_time::{Duration, Instant};
use heapless::spsc::Queue;
use trouble_controller::clock::{ClockError, ClockGate};
use trouble_controller::config::{Config, PDU_POOL_SIZE};
use trouble_controller::link::advertising::{
    AdvKind, AdvParams, AdvSetData, Advertiser, ChannelMap, ConnContext, EventContext, EventState, Features,
    LinkResources, Phase,
};
use trouble_controller::link::filter::{AllowList, Irk, ResolvingList};
use trouble_controller::link::notify::{self, HostEvents, HostQueue, Notification, NotifyQueue};
use trouble_controller::link::pdu::{AdvPdu, PduType};
use trouble_controller::link::pool::DefaultPduPool;
use trouble_controller::phy::{AdvChannel, Phy, Radio, Switch};
use trouble_controller::scheduler::{AbortDecision, Activity, Scheduler};
use trouble_controller::time::Timer;
use trouble_controller::Address;

const OWN: [u8; 6] = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06];
const PEER: [u8; 6] = [0xA1, 0xA2, 0xA3, 0xA4, 0xA5, 0xA6];
const STRANGER: [u8; 6] = [0xEE; 6];
const QUEUE_SIZE: usize = 8;

#[derive(Debug, Clone, PartialEq)]
enum Op {
    Reset,
    TxPower(i8),
    Configure(Phy, u32, u32, u32),
    Channel(u8),
    TxPacket(AdvPdu),
    RxPacket,
    Switch(Switch),
    Tifs(u32),
    StartAt(Instant, u32),
    TxEnable,
    Disable,
    FilterConfigure(u8),
    FilterDisable,
    Rssi,
    Hcto(u32),
    EndCapture,
    TmrStop,
}

#[derive(Default)]
struct MockRadio {
    ops: Vec<Op>,
    rx: AdvPdu,
    done: bool,
    crc_ok: bool,
    devmatch: Option<u8>,
    irk_match: Option<u8>,
    rssi: Option<u8>,
}

impl MockRadio {
    fn receive(&mut self, pdu: AdvPdu) {
        self.rx = pdu;
        self.done = true;
        self.crc_ok = true;
    }

    fn timeout(&mut self) {
        self.done = false;
    }

    fn take_ops(&mut self) -> Vec<Op> {
        std::mem::take(&mut self.ops)
    }
}

impl Radio for MockRadio {
    fn reset(&mut self) {
        self.ops.push(Op::Reset);
    }

    fn set_tx_power(&mut self, dbm: i8) {
        self.ops.push(Op::TxPower(dbm));
    }

    fn configure(&mut self, phy: Phy, access_address: u32, crc_poly: u32, crc_init: u32) {
        self.ops.push(Op::Configure(phy, access_address, crc_poly, crc_init));
    }

    fn set_channel(&mut self, channel: AdvChannel) {
        self.ops.push(Op::Channel(channel.index()));
    }

    fn set_tx_packet(&mut self, pdu: &AdvPdu) {
        self.ops.push(Op::TxPacket(*pdu));
    }

    fn set_rx_packet(&mut self) {
        self.ops.push(Op::RxPacket);
    }

    fn rx_packet(&self) -> &AdvPdu {
        &self.rx
    }

    fn set_switch(&mut self, switch: Switch) {
        self.ops.push(Op::Switch(switch));
    }

    fn set_tifs(&mut self, us: u32) {
        self.ops.push(Op::Tifs(us));
    }

    fn start_at(&mut self, at: Instant, remainder: u32) -> u32 {
        self.ops.push(Op::StartAt(at, remainder));
        remainder
    }

    fn tx_enable(&mut self) {
        self.ops.push(Op::TxEnable);
    }

    fn disable(&mut self) {
        self.ops.push(Op::Disable);
    }

    fn is_ready(&self) -> bool {
        false
    }

    fn is_done(&self) -> bool {
        self.done
    }

    fn crc_is_valid(&self) -> bool {
        self.crc_ok
    }

    fn status_reset(&mut self) {}

    fn filter_configure(&mut self, list: &AllowList) {
        self.ops.push(Op::FilterConfigure(list.enable_bitmask()));
    }

    fn filter_disable(&mut self) {
        self.ops.push(Op::FilterDisable);
    }

    fn filter_match(&self) -> Option<u8> {
        self.devmatch
    }

    fn ar_match(&self) -> Option<u8> {
        self.irk_match
    }

    fn rssi_measure(&mut self) {
        self.ops.push(Op::Rssi);
    }

    fn rssi(&self) -> Option<u8> {
        self.rssi
    }

    fn tifs_base_us(&self) -> u32 {
        10
    }

    fn hcto_configure(&mut self, us: u32) {
        self.ops.push(Op::Hcto(us));
    }

    fn end_capture(&mut self) {
        self.ops.push(Op::EndCapture);
    }

    fn start_ticks(&self) -> u32 {
        1234
    }

    fn end_us(&self) -> u32 {
        5678
    }

    fn tmr_stop(&mut self) {
        self.ops.push(Op::TmrStop);
    }

    fn tx_chain_delay_us(&self, _phy: Phy) -> u32 {
        1
    }

    fn rx_chain_delay_us(&self, _phy: Phy) -> u32 {
        2
    }

    fn rx_ready_delay_us(&self, _phy: Phy) -> u32 {
        40
    }
}

#[derive(Default)]
struct MockClock {
    refs: u32,
    requests: u32,
}

impl ClockGate for MockClock {
    fn request(&mut self) -> Result<(), ClockError> {
        self.refs += 1;
        self.requests += 1;
        Ok(())
    }

    fn release(&mut self) -> Result<(), ClockError> {
        if self.refs == 0 {
            return Err(ClockError::NotRequested);
        }
        self.refs -= 1;
        Ok(())
    }
}

struct MockFilter {
    allow_list: AllowList,
}

impl ResolvingList for MockFilter {
    fn enabled(&self) -> bool {
        false
    }

    fn allow_list(&self, _allow_list: bool) -> &AllowList {
        &self.allow_list
    }

    fn irks(&self) -> &[Irk] {
        &[]
    }

    fn irk_index(&self, irk_match: u8) -> u8 {
        irk_match
    }

    fn addr_allowed(&self, _kind: AddrKind, _addr: &BdAddr, _rl_idx: &mut Option<u8>) -> bool {
        true
    }

    fn irk_allow_listed(&self, _rl_idx: Option<u8>) -> bool {
        false
    }
}

#[derive(Default)]
struct MockScheduler {
    done: Vec<u8>,
    prepare_done: Vec<u8>,
    preempt: bool,
}

impl Scheduler for MockScheduler {
    fn done(&mut self, handle: u8) {
        self.done.push(handle);
    }

    fn prepare_done(&mut self, handle: u8) {
        self.prepare_done.push(handle);
    }

    fn preempt_pending(&mut self, _handle: u8, _at: Instant) -> bool {
        self.preempt
    }
}

struct MockTimer {
    now: Instant,
}

impl Timer for MockTimer {
    fn now(&self) -> Instant {
        self.now
    }
}

struct TestConfig;

impl Config for TestConfig {
    type Timer = MockTimer;
    type Radio = MockRadio;
    type Clock = MockClock;
    type Filter = MockFilter;
    type Notify = HostQueue<'static, QUEUE_SIZE>;
    type Scheduler = MockScheduler;
}

type TestAdvertiser = Advertiser<'static, TestConfig, PDU_POOL_SIZE>;

fn setup(params: AdvParams, features: Features) -> (TestAdvertiser, HostEvents<'static, QUEUE_SIZE>) {
    try_setup(params, features).unwrap()
}

fn try_setup(
    params: AdvParams,
    features: Features,
) -> Result<(TestAdvertiser, HostEvents<'static, QUEUE_SIZE>), trouble_controller::Error> {
    let pool: &'static DefaultPduPool = Box::leak(Box::new(DefaultPduPool::new()));
    let data: &'static AdvSetData<'static, PDU_POOL_SIZE> = Box::leak(Box::new(AdvSetData::new(pool)));
    data.init().unwrap();
    data.set_adv_data(&[0x02, 0x01, 0x06]).unwrap();
    data.set_scan_rsp(&[0x03, 0x09, b'h', b'i']).unwrap();

    let queue: &'static mut Queue<Notification, QUEUE_SIZE> = Box::leak(Box::new(Queue::new()));
    let waker: &'static AtomicWaker = Box::leak(Box::new(AtomicWaker::new()));
    let (notify, events) = notify::split(queue, waker);

    let mut allow_list = AllowList::new();
    allow_list.add(&Address::public(PEER)).unwrap();

    let res = LinkResources {
        timer: MockTimer {
            now: Instant::from_micros(0),
        },
        radio: MockRadio::default(),
        clock: MockClock::default(),
        filter: MockFilter { allow_list },
        notify,
        scheduler: MockScheduler::default(),
    };
    Ok((Advertiser::new(res, data, params, features)?, events))
}

fn params(kind: AdvKind, filter_policy: AdvFilterPolicy) -> AdvParams {
    AdvParams {
        handle: 3,
        kind,
        own_addr: Address::public(OWN),
        peer: Some(Address::public(PEER)),
        filter_policy,
        conn: Some(ConnContext { handle: 0x40 }),
        ..Default::default()
    }
}

fn ctx(us: u64) -> EventContext {
    EventContext {
        ticks_at_expire: Instant::from_micros(us),
        remainder: 0,
        lazy: 0,
    }
}

fn scan_req(scanner: [u8; 6]) -> AdvPdu {
    let mut raw = vec![PduType::ScanReq as u8, 12];
    raw.extend_from_slice(&scanner);
    raw.extend_from_slice(&OWN);
    AdvPdu::from_bytes(&raw).unwrap()
}

fn connect_ind(init: [u8; 6]) -> AdvPdu {
    let mut raw = vec![PduType::ConnectInd as u8, 34];
    raw.extend_from_slice(&init);
    raw.extend_from_slice(&OWN);
    raw.extend_from_slice(&[0x11; 22]);
    AdvPdu::from_bytes(&raw).unwrap()
}

fn channels(ops: &[Op]) -> Vec<u8> {
    ops.iter()
        .filter_map(|op| match op {
            Op::Channel(ch) => Some(*ch),
            _ => None,
        })
        .collect()
}

fn drain(events: &mut HostEvents<'static, QUEUE_SIZE>) -> Vec<Notification> {
    std::iter::from_fn(|| events.try_next()).collect()
}

/// Run the TX and RX interrupts of one channel with nothing received.
fn quiet_channel(adv: &mut TestAdvertiser) {
    assert_eq!(adv.phase(), Phase::Tx);
    adv.on_radio_isr();
    assert_eq!(adv.phase(), Phase::Rx);
    adv.resources_mut().radio.timeout();
    adv.on_radio_isr();
    assert_eq!(adv.phase(), Phase::Done);
    adv.on_radio_isr();
}

#[test]
fn undirected_event_without_requests() {
    let features = Features {
        adv_indication: true,
        ..Default::default()
    };
    let (mut adv, mut events) = setup(params(AdvKind::AdvInd, AdvFilterPolicy::Unfiltered), features);

    adv.prepare(ctx(10_000)).unwrap();
    assert_eq!(adv.state(), EventState::Reserved);
    assert_eq!(adv.resources().clock.refs, 1);

    adv.start().unwrap();
    assert_eq!(adv.state(), EventState::Active);
    let ops = adv.resources_mut().radio.take_ops();
    assert_eq!(ops[0], Op::Reset);
    assert_eq!(ops[2], Op::Configure(Phy::Le1M, 0x8E89_BED6, 0x0000_065B, 0x0055_5555));
    assert!(ops.contains(&Op::StartAt(Instant::from_micros(10_300), 0)));
    assert!(!ops.iter().any(|op| matches!(op, Op::FilterConfigure(_))));
    let Some(Op::TxPacket(pdu)) = ops.iter().find(|op| matches!(op, Op::TxPacket(_))) else {
        panic!("no advertising PDU loaded");
    };
    assert_eq!(pdu.pdu_type(), Some(PduType::AdvInd));
    assert_eq!(pdu.payload(), &[1, 2, 3, 4, 5, 6, 2, 1, 6]);
    assert_eq!(adv.resources().scheduler.prepare_done, vec![3]);

    let mut seen = channels(&ops);
    for _ in 0..3 {
        adv.on_radio_isr();
        let ops = adv.resources_mut().radio.take_ops();
        assert_eq!(
            ops,
            vec![
                Op::Tifs(150),
                Op::Switch(Switch::Tx),
                Op::RxPacket,
                Op::Hcto(10 + 150 + 4 + 1 + 2 + 40 - 1),
                Op::EndCapture,
            ]
        );
        adv.resources_mut().radio.timeout();
        adv.on_radio_isr();
        assert_eq!(adv.phase(), Phase::Done);
        adv.on_radio_isr();
        seen.extend(channels(&adv.resources_mut().radio.take_ops()));
    }

    assert_eq!(seen, vec![37, 38, 39]);
    assert_eq!(adv.state(), EventState::Done);
    assert_eq!(adv.phase(), Phase::Idle);
    assert_eq!(adv.resources().clock.refs, 0);
    assert_eq!(adv.resources().scheduler.done, vec![3]);
    assert_eq!(drain(&mut events), vec![Notification::AdvIndication { handle: 3 }]);

    // A stray interrupt after the event changes nothing.
    adv.on_radio_isr();
    assert!(adv.resources_mut().radio.take_ops().is_empty());
    assert_eq!(adv.resources().scheduler.done, vec![3]);
}

#[test]
fn allow_listed_connect_ind_hands_over() {
    let features = Features {
        chan_sel_2: true,
        ..Default::default()
    };
    let (mut adv, mut events) = setup(params(AdvKind::AdvInd, AdvFilterPolicy::FilterConn), features);

    adv.prepare(ctx(0)).unwrap();
    adv.start().unwrap();
    let ops = adv.resources_mut().radio.take_ops();
    assert!(ops.contains(&Op::FilterConfigure(0b1)));

    adv.on_radio_isr();
    adv.resources_mut().radio.take_ops();

    let mut ci = connect_ind(PEER);
    ci.set_chan_sel(true);
    let radio = &mut adv.resources_mut().radio;
    radio.receive(ci);
    radio.devmatch = Some(0);
    adv.on_radio_isr();

    assert_eq!(adv.phase(), Phase::Abort);
    assert!(adv.data().is_consumed());
    let ops = adv.resources_mut().radio.take_ops();
    assert_eq!(ops, vec![Op::Disable]);

    adv.on_radio_isr();
    let ops = adv.resources_mut().radio.take_ops();
    assert_eq!(ops, vec![Op::FilterDisable, Op::TmrStop]);
    assert_eq!(adv.state(), EventState::Done);
    assert_eq!(adv.resources().clock.refs, 0);
    assert_eq!(adv.resources().scheduler.done, vec![3]);

    let notifications = drain(&mut events);
    assert_eq!(notifications.len(), 2);
    let Notification::Connection(handoff) = notifications[0] else {
        panic!("expected a connection, got {:?}", notifications[0]);
    };
    assert_eq!(handoff.handle, 3);
    assert_eq!(handoff.conn, ConnContext { handle: 0x40 });
    assert_eq!(handoff.pdu, ci);
    assert_eq!(handoff.ticks_anchor, 1234);
    assert_eq!(handoff.us_radio_end, 5677);
    assert_eq!(handoff.us_radio_rdy, 40);
    assert_eq!(handoff.rl_idx, None);
    assert_eq!(
        notifications[1],
        Notification::ChannelSelection {
            conn: ConnContext { handle: 0x40 },
            csa2: true
        }
    );

    // Advertising stays stopped until the connection gives the set back.
    adv.prepare(ctx(100_000)).unwrap();
    adv.start().unwrap();
    assert!(adv.resources_mut().radio.take_ops().is_empty());
    assert_eq!(adv.state(), EventState::Done);
    assert_eq!(adv.resources().clock.refs, 0);
    assert_eq!(adv.resources().scheduler.done, vec![3, 3]);
    assert!(drain(&mut events).is_empty());
}

#[test]
fn connect_ind_without_room_is_declined() {
    let (mut adv, mut events) = setup(
        params(AdvKind::AdvInd, AdvFilterPolicy::Unfiltered),
        Features::default(),
    );
    for handle in 0..QUEUE_SIZE as u8 - 1 {
        adv.resources_mut()
            .notify
            .push(Notification::AdvIndication { handle })
            .unwrap();
    }
    assert_eq!(adv.resources().notify.available(), 0);

    adv.prepare(ctx(0)).unwrap();
    adv.start().unwrap();
    adv.on_radio_isr();
    adv.resources_mut().radio.receive(connect_ind(PEER));
    adv.resources_mut().radio.take_ops();
    adv.on_radio_isr();

    // The request is left unanswered and advertising goes on.
    assert!(!adv.data().is_consumed());
    assert_eq!(adv.phase(), Phase::Done);
    assert_eq!(adv.resources_mut().radio.take_ops(), vec![Op::Disable]);
    adv.on_radio_isr();
    assert_eq!(channels(&adv.resources_mut().radio.take_ops()), vec![38]);
    assert_eq!(drain(&mut events).len(), QUEUE_SIZE - 1);
}

#[test]
fn connect_ind_not_on_allow_list() {
    let (mut adv, mut events) = setup(
        params(AdvKind::AdvInd, AdvFilterPolicy::FilterConnAndScan),
        Features::default(),
    );
    adv.prepare(ctx(0)).unwrap();
    adv.start().unwrap();
    adv.on_radio_isr();

    adv.resources_mut().radio.receive(connect_ind(STRANGER));
    adv.resources_mut().radio.devmatch = None;
    adv.on_radio_isr();
    assert_eq!(adv.phase(), Phase::Done);
    assert!(!adv.data().is_consumed());

    adv.on_radio_isr();
    quiet_channel(&mut adv);
    quiet_channel(&mut adv);
    assert_eq!(adv.state(), EventState::Done);
    assert_eq!(adv.phase(), Phase::Idle);
    assert!(drain(&mut events).is_empty());
}

#[test]
fn scannable_sets_do_not_connect() {
    let (mut adv, mut events) = setup(
        params(AdvKind::ScanInd, AdvFilterPolicy::Unfiltered),
        Features::default(),
    );
    adv.prepare(ctx(0)).unwrap();
    adv.start().unwrap();
    adv.on_radio_isr();
    adv.resources_mut().radio.receive(connect_ind(PEER));
    adv.on_radio_isr();
    assert_eq!(adv.phase(), Phase::Done);
    assert!(!adv.data().is_consumed());
    assert!(drain(&mut events).is_empty());
}

#[test]
fn scan_req_is_answered_and_reported() {
    let features = Features {
        scan_req_notify: true,
        scan_req_rssi: true,
        ..Default::default()
    };
    let (mut adv, mut events) = setup(params(AdvKind::AdvInd, AdvFilterPolicy::Unfiltered), features);
    adv.prepare(ctx(0)).unwrap();
    adv.start().unwrap();
    adv.on_radio_isr();
    assert!(adv.resources_mut().radio.take_ops().contains(&Op::Rssi));

    let req = scan_req(STRANGER);
    adv.resources_mut().radio.receive(req);
    adv.resources_mut().radio.rssi = Some(0xC5);
    adv.on_radio_isr();

    assert_eq!(adv.phase(), Phase::Done);
    let ops = adv.resources_mut().radio.take_ops();
    assert_eq!(ops[0], Op::Switch(Switch::Disable));
    let Op::TxPacket(scan_rsp) = ops[1] else {
        panic!("scan response not loaded: {:?}", ops);
    };
    assert_eq!(scan_rsp.pdu_type(), Some(PduType::ScanRsp));
    assert_eq!(scan_rsp.payload(), &[1, 2, 3, 4, 5, 6, 0x03, 0x09, b'h', b'i']);
    assert!(!ops.contains(&Op::Disable));

    assert_eq!(
        drain(&mut events),
        vec![Notification::ScanRequest {
            handle: 3,
            pdu: req,
            rssi: 0x45
        }]
    );

    // Scan response sent, on to the next channel.
    adv.on_radio_isr();
    assert_eq!(channels(&adv.resources_mut().radio.take_ops()), vec![38]);
}

#[test]
fn scan_req_report_without_room_drops_the_response() {
    let features = Features {
        scan_req_notify: true,
        ..Default::default()
    };
    let (mut adv, _events) = setup(params(AdvKind::AdvInd, AdvFilterPolicy::Unfiltered), features);
    for handle in 0..QUEUE_SIZE as u8 - 1 {
        adv.resources_mut()
            .notify
            .push(Notification::AdvIndication { handle })
            .unwrap();
    }

    adv.prepare(ctx(0)).unwrap();
    adv.start().unwrap();
    adv.on_radio_isr();
    adv.resources_mut().radio.take_ops();
    adv.resources_mut().radio.receive(scan_req(STRANGER));
    adv.on_radio_isr();

    assert_eq!(adv.phase(), Phase::Done);
    assert_eq!(adv.resources_mut().radio.take_ops().last(), Some(&Op::Disable));
}

#[test]
fn scan_req_for_someone_else_is_ignored() {
    let (mut adv, mut events) = setup(
        params(AdvKind::AdvInd, AdvFilterPolicy::Unfiltered),
        Features {
            scan_req_notify: true,
            ..Default::default()
        },
    );
    adv.prepare(ctx(0)).unwrap();
    adv.start().unwrap();
    adv.on_radio_isr();
    adv.resources_mut().radio.take_ops();

    let mut req = scan_req(STRANGER);
    req.set_rx_add(true);
    adv.resources_mut().radio.receive(req);
    adv.on_radio_isr();
    assert_eq!(adv.resources_mut().radio.take_ops(), vec![Op::Disable]);

    // A corrupted request is not even looked at.
    adv.on_radio_isr();
    adv.on_radio_isr();
    adv.resources_mut().radio.receive(scan_req(STRANGER));
    adv.resources_mut().radio.crc_ok = false;
    adv.resources_mut().radio.take_ops();
    adv.on_radio_isr();
    assert_eq!(adv.resources_mut().radio.take_ops(), vec![Op::Disable]);
    assert!(drain(&mut events).is_empty());
}

#[test]
fn data_update_applies_at_the_next_channel() {
    let (mut adv, _events) = setup(
        params(AdvKind::NonconnInd, AdvFilterPolicy::Unfiltered),
        Features::default(),
    );
    adv.prepare(ctx(0)).unwrap();
    adv.start().unwrap();
    // Non-connectable: no listening, straight to the next channel.
    assert_eq!(adv.phase(), Phase::Done);
    adv.resources_mut().radio.take_ops();

    adv.data().set_adv_data(&[0x05, 0xFF, 1, 2, 3, 4]).unwrap();
    adv.on_radio_isr();
    let ops = adv.resources_mut().radio.take_ops();
    let Some(Op::TxPacket(pdu)) = ops.first() else {
        panic!("no advertising PDU loaded: {:?}", ops);
    };
    assert_eq!(pdu.pdu_type(), Some(PduType::AdvNonconnInd));
    assert_eq!(pdu.data(), &[0x05, 0xFF, 1, 2, 3, 4]);
    assert_eq!(ops[1], Op::Switch(Switch::Disable));
    assert_eq!(channels(&ops), vec![38]);
}

#[test]
fn address_rotation_reaches_the_scan_response() {
    let features = Features {
        privacy: true,
        ..Default::default()
    };
    let (mut adv, _events) = setup(params(AdvKind::AdvInd, AdvFilterPolicy::Unfiltered), features);
    adv.prepare(ctx(0)).unwrap();
    adv.start().unwrap();
    quiet_channel(&mut adv);
    adv.resources_mut().radio.take_ops();

    let rpa = Address::random([0x11, 0x22, 0x33, 0x44, 0x55, 0x66]);
    adv.data().set_own_addr(&rpa).unwrap();
    quiet_channel(&mut adv);

    let adv_pdu = adv.data().adv_pdu().unwrap();
    assert_eq!(adv_pdu.adv_addr(), rpa.addr);
    assert_eq!(adv.data().scan_rsp_pdu().unwrap().adv_addr(), rpa.addr);
}

#[test]
fn abort_before_start_releases_the_clock() {
    let (mut adv, _events) = setup(
        params(AdvKind::AdvInd, AdvFilterPolicy::Unfiltered),
        Features::default(),
    );
    adv.prepare(ctx(0)).unwrap();
    adv.abort().unwrap();

    assert_eq!(adv.state(), EventState::Done);
    assert_eq!(adv.resources().clock.refs, 0);
    assert_eq!(adv.resources().scheduler.done, vec![3]);
    assert!(adv.resources_mut().radio.take_ops().is_empty());
    assert!(adv.start().is_err());
}

#[test]
fn empty_channel_map_is_refused() {
    let mut p = params(AdvKind::AdvInd, AdvFilterPolicy::Unfiltered);
    p.channel_map = ChannelMap::NONE;
    assert!(matches!(
        try_setup(p, Features::default()),
        Err(trouble_controller::Error::InvalidParams)
    ));

    let (mut adv, _events) = setup(
        params(AdvKind::AdvInd, AdvFilterPolicy::Unfiltered),
        Features::default(),
    );
    p.channel_map = ChannelMap::from_bits(0b1000);
    assert_eq!(adv.set_params(p), Err(trouble_controller::Error::InvalidParams));
    assert_eq!(adv.params().channel_map, ChannelMap::ALL);

    // The set keeps advertising with its previous parameters.
    adv.prepare(ctx(0)).unwrap();
    adv.start().unwrap();
    assert_eq!(channels(&adv.resources_mut().radio.take_ops()), vec![37]);
}

#[test]
fn reserved_directed_event_is_not_resumed() {
    let (mut adv, _events) = setup(
        params(AdvKind::DirectHighDuty, AdvFilterPolicy::Unfiltered),
        Features::default(),
    );
    adv.prepare(ctx(0)).unwrap();

    // Nothing is on air yet, so there is nothing to resume.
    assert_eq!(adv.is_abort(Activity::Other), AbortDecision::Cancel);
    assert_eq!(adv.resources().clock.refs, 1);
    adv.abort().unwrap();

    assert_eq!(adv.state(), EventState::Done);
    assert_eq!(adv.resources().clock.refs, 0);
    assert_eq!(adv.resources().scheduler.done, vec![3]);
    assert!(adv.resume().is_err());
}

#[test]
fn repeated_resume_decision_keeps_one_reference() {
    let (mut adv, _events) = setup(
        params(AdvKind::DirectHighDuty, AdvFilterPolicy::Unfiltered),
        Features::default(),
    );
    adv.prepare(ctx(0)).unwrap();
    adv.start().unwrap();

    assert_eq!(adv.is_abort(Activity::Other), AbortDecision::Resume);
    assert_eq!(adv.is_abort(Activity::Other), AbortDecision::Resume);
    assert_eq!(adv.resources().clock.refs, 2);
    adv.abort().unwrap();
    assert_eq!(adv.is_abort(Activity::Other), AbortDecision::Resume);
    adv.on_radio_isr();
    assert_eq!(adv.state(), EventState::Reserved);
    assert_eq!(adv.resources().clock.refs, 1);

    adv.resume().unwrap();
    adv.abort().unwrap();
    adv.on_radio_isr();
    assert_eq!(adv.state(), EventState::Done);
    assert_eq!(adv.resources().clock.refs, 0);
    assert_eq!(adv.resources().scheduler.done, vec![3, 3]);
}

#[test]
fn pending_resume_can_be_cancelled() {
    let (mut adv, _events) = setup(
        params(AdvKind::DirectHighDuty, AdvFilterPolicy::Unfiltered),
        Features::default(),
    );
    adv.prepare(ctx(0)).unwrap();
    adv.start().unwrap();
    assert_eq!(adv.is_abort(Activity::Other), AbortDecision::Resume);
    adv.abort().unwrap();
    adv.on_radio_isr();
    assert_eq!(adv.state(), EventState::Reserved);

    // The reference kept for the resume is the only one left.
    adv.abort().unwrap();
    assert_eq!(adv.state(), EventState::Done);
    assert_eq!(adv.resources().clock.refs, 0);
    assert_eq!(adv.resources().scheduler.done, vec![3, 3]);
}

#[test]
fn abort_on_air() {
    let (mut adv, _events) = setup(
        params(AdvKind::AdvInd, AdvFilterPolicy::FilterScan),
        Features::default(),
    );
    adv.prepare(ctx(0)).unwrap();
    adv.start().unwrap();
    adv.on_radio_isr();

    assert_eq!(adv.is_abort(Activity::Other), AbortDecision::Cancel);
    assert_eq!(adv.is_abort(Activity::Advertising(3)), AbortDecision::Cancel);
    adv.resources_mut().radio.take_ops();
    adv.abort().unwrap();
    assert_eq!(adv.state(), EventState::Preempted);
    assert_eq!(adv.phase(), Phase::Abort);
    assert_eq!(adv.resources_mut().radio.take_ops(), vec![Op::Disable]);
    assert_eq!(adv.abort(), Err(trouble_controller::Error::InvalidState));

    adv.on_radio_isr();
    assert_eq!(adv.resources_mut().radio.take_ops(), vec![Op::FilterDisable, Op::TmrStop]);
    assert_eq!(adv.state(), EventState::Done);
    assert_eq!(adv.resources().clock.refs, 0);
    assert_eq!(adv.resources().scheduler.done, vec![3]);
}

#[test]
fn late_preemption_goes_through_abort() {
    let (mut adv, _events) = setup(
        params(AdvKind::AdvInd, AdvFilterPolicy::Unfiltered),
        Features::default(),
    );
    adv.resources_mut().scheduler.preempt = true;
    adv.prepare(ctx(0)).unwrap();
    adv.start().unwrap();

    assert_eq!(adv.state(), EventState::Preempted);
    assert_eq!(adv.phase(), Phase::Abort);
    assert!(adv.resources().scheduler.prepare_done.is_empty());
    assert_eq!(adv.resources_mut().radio.take_ops().last(), Some(&Op::Disable));

    adv.on_radio_isr();
    assert_eq!(adv.state(), EventState::Done);
    assert_eq!(adv.resources().clock.refs, 0);
    assert_eq!(adv.resources().scheduler.done, vec![3]);
}

#[test]
fn high_duty_cycle_directed_resumes_after_preemption() {
    let mut p = params(AdvKind::DirectHighDuty, AdvFilterPolicy::Unfiltered);
    p.channel_map = ChannelMap::new(true, false, true);
    p.event_offset = Duration::from_micros(500);
    let (mut adv, _events) = setup(p, Features::default());

    adv.prepare(ctx(1_000)).unwrap();
    adv.start().unwrap();
    let mut seen = channels(&adv.resources_mut().radio.take_ops());
    // The channel map is cycled for as long as the event runs.
    for _ in 0..3 {
        quiet_channel(&mut adv);
        seen.extend(channels(&adv.resources_mut().radio.take_ops()));
    }
    assert_eq!(seen, vec![37, 39, 37, 39]);
    assert_eq!(adv.state(), EventState::Active);

    // Our own next event does not preempt a directed one.
    assert_eq!(adv.is_abort(Activity::Advertising(3)), AbortDecision::Continue);

    assert_eq!(adv.is_abort(Activity::Other), AbortDecision::Resume);
    assert_eq!(adv.resources().clock.refs, 2);
    adv.abort().unwrap();
    adv.on_radio_isr();
    assert_eq!(adv.state(), EventState::Reserved);
    assert_eq!(adv.resources().clock.refs, 1);
    assert_eq!(adv.resources().scheduler.done, vec![3]);

    adv.resources_mut().timer.now = Instant::from_micros(50_000);
    adv.resources_mut().radio.take_ops();
    adv.resume().unwrap();
    assert_eq!(adv.state(), EventState::Active);
    let ops = adv.resources_mut().radio.take_ops();
    assert!(ops.contains(&Op::StartAt(Instant::from_micros(50_300), 0)));
    assert_eq!(channels(&ops), vec![37]);
    assert_eq!(adv.resources().clock.requests, 2);

    adv.abort().unwrap();
    adv.on_radio_isr();
    assert_eq!(adv.state(), EventState::Done);
    assert_eq!(adv.resources().clock.refs, 0);
    assert_eq!(adv.resources().scheduler.done, vec![3, 3]);
}

#[test]
fn lifecycle_misuse() {
    let (mut adv, _events) = setup(
        params(AdvKind::AdvInd, AdvFilterPolicy::Unfiltered),
        Features::default(),
    );
    assert!(adv.start().is_err());
    assert!(adv.abort().is_err());
    assert!(adv.resume().is_err());

    adv.prepare(ctx(0)).unwrap();
    assert!(adv.prepare(ctx(0)).is_err());
    assert!(adv.set_params(params(AdvKind::ScanInd, AdvFilterPolicy::Unfiltered)).is_err());
    adv.abort().unwrap();

    adv.set_params(params(AdvKind::ScanInd, AdvFilterPolicy::Unfiltered)).unwrap();
    assert_eq!(adv.data().adv_pdu().unwrap().pdu_type(), Some(PduType::AdvScanInd));
    assert_eq!(adv.params().kind, AdvKind::ScanInd);
    assert_eq!(adv.features(), &Features::default());
    assert_eq!(adv.resources().clock.refs, 0);
}
