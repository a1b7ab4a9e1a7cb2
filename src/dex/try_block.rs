//! Try ranges and their catch handlers.
//!
//! See https://source.android.com/docs/core/runtime/dex-format#type-item
//!
//! A [`TryItem`] only holds what a range catches. Where it starts, where it ends and where
//! each handler lands are [`ExtraLine`]s anchored on the instruction list, so edits to the
//! code carry them along.

use crate::dex::error::DexError;
use crate::dex::instruction_list::InstructionList;
use crate::dex::instructions::ExtraLine;
use crate::dex::pool::DexPools;
use crate::dex::{read_sleb128, read_u2, read_u4, read_uleb128, write_sleb128, write_u2, write_u4, write_uleb128};
use crate::types::TypeKey;
use log::warn;
use std::collections::HashMap;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CatchHandler
{
    pub catches: Vec<TypeKey>,
    pub catch_all: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TryItem
{
    pub handler: CatchHandler,
}

/// Resolved addresses of one try range.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TryAddresses
{
    pub start: Option<u32>,
    pub end: Option<u32>,
    pub catches: Vec<Option<u32>>,
    pub catch_all: Option<u32>,
}

/// Collects the anchored addresses of every try range.
pub fn try_addresses(tries: &[TryItem], list: &InstructionList) -> Vec<TryAddresses>
{
    let mut found: Vec<TryAddresses> = tries
        .iter()
        .map(|t| TryAddresses { catches: vec![None; t.handler.catches.len()], ..TryAddresses::default() })
        .collect();
    for (address, line) in list.anchored_lines()
    {
        match line
        {
            ExtraLine::TryStart(t) if t < found.len() => found[t].start = Some(address),
            ExtraLine::TryEnd(t) if t < found.len() => found[t].end = Some(address),
            ExtraLine::Catch { try_index, index } if try_index < found.len() => {
                if let Some(slot) = found[try_index].catches.get_mut(index)
                {
                    *slot = Some(address);
                }
            }
            ExtraLine::CatchAll(t) if t < found.len() => found[t].catch_all = Some(address),
            _ => {}
        }
    }
    found
}

/// Renumbers the lines of tries after `removed`, which must already be cleared.
pub(crate) fn shift_try_lines(list: &mut InstructionList, removed: usize)
{
    let shift = |t: usize| if t > removed { t - 1 } else { t };
    for ins in list.items_mut()
    {
        for line in ins.extra_lines.iter_mut()
        {
            *line = match *line
            {
                ExtraLine::TryStart(t) => ExtraLine::TryStart(shift(t)),
                ExtraLine::TryEnd(t) => ExtraLine::TryEnd(shift(t)),
                ExtraLine::Catch { try_index, index } => ExtraLine::Catch { try_index: shift(try_index), index },
                ExtraLine::CatchAll(t) => ExtraLine::CatchAll(shift(t)),
                other => other,
            };
        }
    }
}

/// Reads `count` try_items and the handler list after them, anchoring their addresses on `list`.
pub(crate) fn read_tries(
    bytes: &[u8],
    ix: &mut usize,
    count: usize,
    list: &mut InstructionList,
    pools: &DexPools,
) -> Result<Vec<TryItem>, DexError>
{
    let mut raw = Vec::with_capacity(count);
    for _ in 0..count
    {
        let start = read_u4(bytes, ix)?;
        let insn_count = read_u2(bytes, ix)?;
        let handler_off = read_u2(bytes, ix)?;
        raw.push((start, insn_count, handler_off));
    }

    let base = *ix;
    let size = read_uleb128(bytes, ix)?;
    let mut handlers: HashMap<u16, (CatchHandler, Vec<u32>, Option<u32>)> = HashMap::new();
    for _ in 0..size
    {
        let off = (*ix - base) as u16;
        let handler = read_handler(bytes, ix, pools)?;
        handlers.insert(off, handler);
    }

    let mut tries = Vec::with_capacity(count);
    for (t, (start, insn_count, handler_off)) in raw.into_iter().enumerate()
    {
        let (handler, addresses, catch_all) = match handlers.get(&handler_off)
        {
            Some(h) => h.clone(),
            None => {
                let mut at = base + handler_off as usize;
                read_handler(bytes, &mut at, pools).map_err(|e| err!(e, "handler at +0x{:x}", handler_off))?
            }
        };
        list.anchor(start, ExtraLine::TryStart(t), true).map_err(|e| err!(e, "try_item #{}", t))?;
        list.anchor(start + insn_count as u32, ExtraLine::TryEnd(t), true).map_err(|e| err!(e, "try_item #{}", t))?;
        for (index, address) in addresses.into_iter().enumerate()
        {
            list.anchor(address, ExtraLine::Catch { try_index: t, index }, true).map_err(|e| err!(e, "try_item #{}", t))?;
        }
        if let Some(address) = catch_all
        {
            list.anchor(address, ExtraLine::CatchAll(t), true).map_err(|e| err!(e, "try_item #{}", t))?;
        }
        tries.push(TryItem { handler });
    }
    Ok(tries)
}

fn read_handler(bytes: &[u8], ix: &mut usize, pools: &DexPools) -> Result<(CatchHandler, Vec<u32>, Option<u32>), DexError>
{
    let size = read_sleb128(bytes, ix)?;
    let mut handler = CatchHandler { catches: Vec::new(), catch_all: size <= 0 };
    let mut addresses = Vec::new();
    for _ in 0..size.unsigned_abs()
    {
        let type_idx = read_uleb128(bytes, ix)?;
        let address = read_uleb128(bytes, ix)?;
        handler.catches.push(pools.types.at(type_idx)?.clone());
        addresses.push(address);
    }
    let catch_all = if size <= 0 { Some(read_uleb128(bytes, ix)?) } else { None };
    Ok((handler, addresses, catch_all))
}

/// Writes try_items followed by the deduplicated handler list.
pub(crate) fn write_tries(tries: &[TryItem], list: &InstructionList, pools: &DexPools, buf: &mut Vec<u8>) -> Result<(), DexError>
{
    let addresses = try_addresses(tries, list);
    let mut ranges = Vec::with_capacity(tries.len());
    for (t, (item, found)) in tries.iter().zip(addresses.iter()).enumerate()
    {
        let (start, end) = match (found.start, found.end)
        {
            (Some(s), Some(e)) => (s, e),
            _ => fail!(kind: Validation, "Try range #{} has lost its bounds", t),
        };
        if end <= start
        {
            fail!(kind: Validation, "Try range #{} is empty", t);
        }
        if end - start > u16::MAX as u32
        {
            fail!(kind: Validation, "Try range #{} covers {} code units", t, end - start);
        }
        if item.handler.catch_all && found.catch_all.is_none()
        {
            fail!(kind: Validation, "Catch-all of try range #{} has no target", t);
        }

        let mut encoded = Vec::new();
        let count = item.handler.catches.len() as i32;
        write_sleb128(&mut encoded, if item.handler.catch_all { -count } else { count });
        for (type_key, address) in item.handler.catches.iter().zip(found.catches.iter())
        {
            let address = match address
            {
                Some(a) => *a,
                None => fail!(kind: Validation, "Catch of {} in try range #{} has no target", type_key, t),
            };
            write_uleb128(&mut encoded, pools.type_index(type_key)?);
            write_uleb128(&mut encoded, address);
        }
        if let (true, Some(address)) = (item.handler.catch_all, found.catch_all)
        {
            write_uleb128(&mut encoded, address);
        }
        if item.handler.catches.is_empty() && !item.handler.catch_all
        {
            warn!("Try range #{} catches nothing", t);
        }
        ranges.push((start, end, encoded));
    }
    ranges.sort_by_key(|(start, _, _)| *start);
    for pair in ranges.windows(2)
    {
        if pair[0].1 > pair[1].0
        {
            fail!(kind: Validation, "Try ranges at 0x{:x} and 0x{:x} overlap", pair[0].0, pair[1].0);
        }
    }

    let mut unique: Vec<&Vec<u8>> = Vec::new();
    for (_, _, encoded) in ranges.iter()
    {
        if !unique.contains(&encoded)
        {
            unique.push(encoded);
        }
    }
    let mut handler_list = Vec::new();
    write_uleb128(&mut handler_list, unique.len() as u32);
    let mut offsets = Vec::with_capacity(unique.len());
    for encoded in unique.iter()
    {
        offsets.push(handler_list.len());
        handler_list.extend_from_slice(encoded);
    }

    for (start, end, encoded) in ranges.iter()
    {
        let position = unique.iter().position(|u| *u == encoded).unwrap_or(0);
        let off = offsets[position];
        if off > u16::MAX as usize
        {
            fail!(kind: Validation, "Handler offset 0x{:x} does not fit", off);
        }
        write_u4(buf, *start);
        write_u2(buf, (end - start) as u16);
        write_u2(buf, off as u16);
    }
    buf.extend_from_slice(&handler_list);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::ErrorKind;

    // const/4 v0, 0 ; const/4 v1, 1 ; return v0 ; return v1
    const CODE: [u16; 4] = [0x0012, 0x1112, 0x000f, 0x010f];

    fn pools() -> DexPools {
        let mut pools = DexPools::new();
        pools.intern_type(&TypeKey::new("Ljava/lang/Exception;"));
        pools.refresh();
        pools
    }

    #[test]
    fn handlers_are_shared_on_write() {
        let pools = pools();
        let mut list = InstructionList::read(&CODE, &pools).expect("read failed");
        let exception = TypeKey::new("Ljava/lang/Exception;");
        let tries = vec![
            TryItem { handler: CatchHandler { catches: vec![exception.clone()], catch_all: false } },
            TryItem { handler: CatchHandler { catches: vec![exception], catch_all: false } },
        ];
        list.anchor(0, ExtraLine::TryStart(0), true).unwrap();
        list.anchor(1, ExtraLine::TryEnd(0), true).unwrap();
        list.anchor(1, ExtraLine::TryStart(1), true).unwrap();
        list.anchor(2, ExtraLine::TryEnd(1), true).unwrap();
        list.anchor(3, ExtraLine::Catch { try_index: 0, index: 0 }, true).unwrap();
        list.anchor(3, ExtraLine::Catch { try_index: 1, index: 0 }, true).unwrap();

        let mut buf = Vec::new();
        write_tries(&tries, &list, &pools, &mut buf).expect("write failed");
        // two try_items, then one handler: size 1, type 0, address 3
        assert_eq!(buf.len(), 16 + 4);
        assert_eq!(&buf[16..], &[1, 1, 0, 3]);
        assert_eq!(&buf[6..8], &buf[14..16]);

        let mut fresh = InstructionList::read(&CODE, &pools).expect("read failed");
        let mut ix = 0;
        let read = read_tries(&buf, &mut ix, 2, &mut fresh, &pools).expect("read failed");
        assert_eq!(read, tries);
        assert_eq!(ix, buf.len());
        assert_eq!(try_addresses(&read, &fresh), try_addresses(&tries, &list));
    }

    #[test]
    fn catch_all_round_trip() {
        let pools = pools();
        let mut list = InstructionList::read(&CODE, &pools).expect("read failed");
        let tries = vec![TryItem { handler: CatchHandler { catches: vec![], catch_all: true } }];
        list.anchor(0, ExtraLine::TryStart(0), true).unwrap();
        list.anchor(4, ExtraLine::TryEnd(0), true).unwrap();
        list.anchor(2, ExtraLine::CatchAll(0), true).unwrap();
        let mut buf = Vec::new();
        write_tries(&tries, &list, &pools, &mut buf).expect("write failed");
        assert_eq!(&buf[8..], &[1, 0, 2]);
        let found = try_addresses(&tries, &list);
        assert_eq!(found[0].end, Some(4));
    }

    #[test]
    fn overlapping_ranges_are_rejected() {
        let pools = pools();
        let mut list = InstructionList::read(&CODE, &pools).expect("read failed");
        let tries = vec![TryItem::default(), TryItem::default()];
        list.anchor(0, ExtraLine::TryStart(0), true).unwrap();
        list.anchor(2, ExtraLine::TryEnd(0), true).unwrap();
        list.anchor(1, ExtraLine::TryStart(1), true).unwrap();
        list.anchor(3, ExtraLine::TryEnd(1), true).unwrap();
        let e = write_tries(&tries, &list, &pools, &mut Vec::new()).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::Validation);
    }

    #[test]
    fn misaligned_bounds_are_corrupt() {
        let pools = pools();
        let mut list = InstructionList::read(&[0x0013, 0x0005, 0x000f], &pools).expect("read failed");
        // try_item from 1 to 2, lands inside const/16
        let bytes = [1, 0, 0, 0, 1, 0, 1, 0, 1, 1, 0, 2];
        let e = read_tries(&bytes, &mut 0, 1, &mut list, &pools).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::Corrupt);
    }
}
