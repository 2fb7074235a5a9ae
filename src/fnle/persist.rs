//! Binary/JSON layout for a sealed FNLE snapshot (spec.md §4.3). Each family
//! serializes to `line(6).bin`, `where(6).bin`, `objects(6).json`,
//! `overlapping(6).bin`, with a shared `direct.json` and `tsCreated.json`.

use super::address::Address;
use super::family::{DirectValue, Event, EventKind, Family};
use crate::error::FnleError;
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::io::Write;
use std::marker::PhantomData;
use std::path::Path;

/// Backing storage for a family's sweep line. `Built` is the typed in-memory
/// form produced by `build()`; `Loaded` decodes one record at a time directly
/// off the mapped byte buffer, so a reload never eagerly materializes the
/// whole line.
pub(crate) enum LineStore<A: Address> {
    Built(Vec<Event<A>>),
    Loaded {
        bytes: Vec<u8>,
        _marker: PhantomData<A>,
    },
}

fn record_width<A: Address>() -> usize {
    1 + A::COORD_BYTES + 3 + 3
}

fn write_u24_le(out: &mut [u8], v: u32) {
    out[0] = (v & 0xff) as u8;
    out[1] = ((v >> 8) & 0xff) as u8;
    out[2] = ((v >> 16) & 0xff) as u8;
}

fn read_u24_le(buf: &[u8]) -> u32 {
    (buf[0] as u32) | ((buf[1] as u32) << 8) | ((buf[2] as u32) << 16)
}

fn decode_event_at<A: Address>(bytes: &[u8], i: usize, w: usize) -> Event<A> {
    let rec = &bytes[i * w..(i + 1) * w];
    let kind = if rec[0] & 0b11 == 0 {
        EventKind::Start
    } else {
        EventKind::End
    };
    let coord = A::decode_coord(&rec[1..1 + A::COORD_BYTES]);
    let slot = read_u24_le(&rec[1 + A::COORD_BYTES..4 + A::COORD_BYTES]);
    let mate = read_u24_le(&rec[4 + A::COORD_BYTES..7 + A::COORD_BYTES]);
    Event {
        kind,
        coord,
        slot,
        mate,
    }
}

impl<A: Address> LineStore<A> {
    pub(crate) fn len(&self) -> usize {
        match self {
            LineStore::Built(v) => v.len(),
            LineStore::Loaded { bytes, .. } => bytes.len() / record_width::<A>(),
        }
    }

    pub(crate) fn get(&self, i: usize) -> Event<A> {
        match self {
            LineStore::Built(v) => v[i],
            LineStore::Loaded { bytes, .. } => decode_event_at(bytes, i, record_width::<A>()),
        }
    }

    fn encode(events: &[Event<A>]) -> Vec<u8> {
        let w = record_width::<A>();
        let mut buf = vec![0u8; w * events.len()];
        for (i, ev) in events.iter().enumerate() {
            let rec = &mut buf[i * w..(i + 1) * w];
            rec[0] = match ev.kind {
                EventKind::Start => 0,
                EventKind::End => 1,
            };
            ev.coord.encode_coord(&mut rec[1..1 + A::COORD_BYTES]);
            write_u24_le(&mut rec[1 + A::COORD_BYTES..4 + A::COORD_BYTES], ev.slot);
            write_u24_le(&mut rec[4 + A::COORD_BYTES..7 + A::COORD_BYTES], ev.mate);
        }
        buf
    }
}

fn atomic_write(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("tmp");
    {
        let mut f = std::fs::File::create(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }
    std::fs::rename(tmp, path)
}

/// File-name stem for a family: `line` / `where` / `objects` / `overlapping`
/// for IPv4, with a `6` suffix for IPv6 (spec.md §4.3).
pub(crate) trait FamilySuffix {
    const SUFFIX: &'static str;
}
impl FamilySuffix for u32 {
    const SUFFIX: &'static str = "";
}
impl FamilySuffix for u128 {
    const SUFFIX: &'static str = "6";
}

pub(crate) fn persist_family<A, P>(dir: &Path, family: &Family<A, P>) -> Result<(), FnleError>
where
    A: Address + FamilySuffix,
    P: Clone + Serialize,
{
    let events: Vec<Event<A>> = match &family.line {
        LineStore::Built(v) => v.clone(),
        LineStore::Loaded { bytes, .. } => {
            let w = record_width::<A>();
            (0..bytes.len() / w)
                .map(|i| decode_event_at::<A>(bytes, i, w))
                .collect()
        }
    };
    let line_bytes = LineStore::<A>::encode(&events);
    atomic_write(&dir.join(format!("line{}.bin", A::SUFFIX)), &line_bytes)?;

    let mut where_bytes = Vec::with_capacity(family.where_.len() * 4);
    for w in &family.where_ {
        where_bytes.extend_from_slice(&w.to_le_bytes());
    }
    atomic_write(&dir.join(format!("where{}.bin", A::SUFFIX)), &where_bytes)?;

    let objects_json = serde_json::to_vec(&family.payloads)?;
    atomic_write(
        &dir.join(format!("objects{}.json", A::SUFFIX)),
        &objects_json,
    )?;

    let mut overlap_bytes = Vec::new();
    for (slot, neighbours) in family.overlaps.iter().enumerate() {
        overlap_bytes.extend_from_slice(&(slot as u32).to_le_bytes());
        overlap_bytes.extend_from_slice(&(neighbours.len() as u32).to_le_bytes());
        for n in neighbours {
            overlap_bytes.extend_from_slice(&n.to_le_bytes());
        }
    }
    atomic_write(
        &dir.join(format!("overlapping{}.bin", A::SUFFIX)),
        &overlap_bytes,
    )?;

    Ok(())
}

/// `direct.json` is one file shared by both families, keyed by the decimal
/// (IPv4) or canonical-text (IPv6) form of the address.
pub(crate) fn persist_direct<P: Clone + Serialize>(
    dir: &Path,
    v4_direct: &HashMap<u32, DirectValue<P>>,
    v6_direct: &HashMap<u128, DirectValue<P>>,
) -> Result<(), FnleError> {
    let mut obj = serde_json::Map::new();
    for (addr, value) in v4_direct {
        obj.insert(addr.format_direct_key(), direct_value_to_json(value)?);
    }
    for (addr, value) in v6_direct {
        obj.insert(addr.format_direct_key(), direct_value_to_json(value)?);
    }
    atomic_write(
        &dir.join("direct.json"),
        &serde_json::to_vec(&serde_json::Value::Object(obj))?,
    )?;
    Ok(())
}

fn direct_value_to_json<P: Serialize>(value: &DirectValue<P>) -> Result<serde_json::Value, FnleError> {
    Ok(match value {
        DirectValue::One(p) => serde_json::to_value(p)?,
        DirectValue::Many(v) => serde_json::to_value(v)?,
    })
}

pub(crate) fn write_version(dir: &Path) -> Result<u64, FnleError> {
    let ts = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;
    let tail = rand::rng().random_range(0..100u64);
    let stamp = ts + tail;
    let body = serde_json::json!({ "lutVersion": stamp });
    atomic_write(&dir.join("tsCreated.json"), &serde_json::to_vec(&body)?)?;
    Ok(stamp)
}

pub(crate) fn read_version(dir: &Path) -> Result<u64, FnleError> {
    let bytes = std::fs::read(dir.join("tsCreated.json"))?;
    let v: serde_json::Value = serde_json::from_slice(&bytes)?;
    v.get("lutVersion")
        .and_then(|v| v.as_u64())
        .ok_or_else(|| FnleError::Corrupt("tsCreated.json missing lutVersion".into()))
}

pub(crate) fn load_family<A, P>(dir: &Path) -> Result<Family<A, P>, FnleError>
where
    A: Address + FamilySuffix,
    P: Clone + DeserializeOwned,
{
    let line_path = dir.join(format!("line{}.bin", A::SUFFIX));
    let line_bytes = if line_path.exists() {
        std::fs::read(&line_path)?
    } else {
        Vec::new()
    };
    let n_events = line_bytes.len() / record_width::<A>();

    let where_path = dir.join(format!("where{}.bin", A::SUFFIX));
    let where_bytes = if where_path.exists() {
        std::fs::read(&where_path)?
    } else {
        Vec::new()
    };
    let where_: Vec<u32> = where_bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
        .collect();
    let n = where_.len();

    let objects_path = dir.join(format!("objects{}.json", A::SUFFIX));
    let payloads: Vec<P> = if objects_path.exists() {
        serde_json::from_slice(&std::fs::read(&objects_path)?)?
    } else {
        Vec::new()
    };

    // Recover `ranges` from the sweep line so `lookup()`'s `contains()` checks
    // work without re-decoding the whole line per query.
    let store = LineStore::<A>::Loaded {
        bytes: line_bytes,
        _marker: PhantomData,
    };
    let mut ranges = vec![(A::from_u128(0), A::from_u128(0)); n];
    for i in 0..n_events {
        let ev = store.get(i);
        if matches!(ev.kind, EventKind::Start) {
            let mate = store.get(ev.mate as usize);
            ranges[ev.slot as usize] = (ev.coord, mate.coord);
        }
    }

    let overlap_path = dir.join(format!("overlapping{}.bin", A::SUFFIX));
    let overlap_bytes = if overlap_path.exists() {
        std::fs::read(&overlap_path)?
    } else {
        Vec::new()
    };
    let mut overlaps = vec![Vec::new(); n];
    let mut pos = 0usize;
    while pos + 8 <= overlap_bytes.len() {
        let key = u32::from_le_bytes(overlap_bytes[pos..pos + 4].try_into().unwrap()) as usize;
        let count = u32::from_le_bytes(overlap_bytes[pos + 4..pos + 8].try_into().unwrap()) as usize;
        pos += 8;
        let mut list = Vec::with_capacity(count);
        for _ in 0..count {
            if pos + 4 > overlap_bytes.len() {
                break;
            }
            let nb = u32::from_le_bytes(overlap_bytes[pos..pos + 4].try_into().unwrap());
            // Sanitize: drop neighbours outside the loaded range array.
            if (nb as usize) < n {
                list.push(nb);
            }
            pos += 4;
        }
        if key < n {
            overlaps[key] = list;
        }
    }

    let direct_path = dir.join("direct.json");
    let mut direct: HashMap<A, DirectValue<P>> = HashMap::new();
    if direct_path.exists() {
        let v: serde_json::Value = serde_json::from_slice(&std::fs::read(&direct_path)?)?;
        if let Some(obj) = v.as_object() {
            for (key, val) in obj {
                let Some(addr) = A::parse_direct_key(key) else {
                    continue;
                };
                let dv = if val.is_array() {
                    DirectValue::Many(serde_json::from_value(val.clone())?)
                } else {
                    DirectValue::One(serde_json::from_value(val.clone())?)
                };
                direct.insert(addr, dv);
            }
        }
    }

    Ok(Family {
        sealed: true,
        ranges,
        payloads,
        line: store,
        where_,
        overlaps,
        direct,
        oversize_rejected: 0,
        duplicate_rejected: 0,
        ..Family::default()
    })
}
