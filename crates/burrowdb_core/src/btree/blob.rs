//! Blob page chains for large records and duplicate tables.
//!
//! ```text
//! | type (1) | pad (7) | next (8) | used (4) | pad (4) | data ... |
//! ```

use crate::error::{CoreError, CoreResult};
use crate::page::{read_u32, read_u64, PageType, Pager};
use crate::types::PageId;

const BLOB_HEADER: usize = 24;

/// Writes `data` into a new chain and returns its head page.
pub(crate) fn write_blob(pager: &Pager, data: &[u8]) -> CoreResult<PageId> {
    let capacity = pager.page_size() - BLOB_HEADER;
    let chunks: Vec<&[u8]> = if data.is_empty() {
        vec![&[][..]]
    } else {
        data.chunks(capacity).collect()
    };

    let pages = chunks
        .iter()
        .map(|_| pager.allocate())
        .collect::<CoreResult<Vec<_>>>()?;

    for (index, chunk) in chunks.iter().enumerate() {
        let next = pages.get(index + 1).copied();
        let mut page = vec![0u8; pager.page_size()];
        page[0] = PageType::Blob as u8;
        page[8..16].copy_from_slice(&PageId::to_link(next).to_le_bytes());
        page[16..20].copy_from_slice(&(chunk.len() as u32).to_le_bytes());
        page[BLOB_HEADER..BLOB_HEADER + chunk.len()].copy_from_slice(chunk);
        pager.write(pages[index], page)?;
    }
    Ok(pages[0])
}

/// Reads a whole chain.
pub(crate) fn read_blob(pager: &Pager, head: PageId) -> CoreResult<Vec<u8>> {
    let mut data = Vec::new();
    visit_chain(pager, head, |page| {
        let used = read_u32(page, 16) as usize;
        data.extend_from_slice(&page[BLOB_HEADER..BLOB_HEADER + used]);
    })?;
    Ok(data)
}

/// Reads a chain that must hold exactly `len` bytes.
pub(crate) fn read_blob_exact(pager: &Pager, head: PageId, len: u64) -> CoreResult<Vec<u8>> {
    let data = read_blob(pager, head)?;
    if data.len() as u64 != len {
        return Err(CoreError::integrity(format!(
            "blob at {head} holds {} bytes, expected {len}",
            data.len()
        )));
    }
    Ok(data)
}

/// Frees every page of a chain.
pub(crate) fn free_blob(pager: &Pager, head: PageId) -> CoreResult<()> {
    for page in chain_pages(pager, head)? {
        pager.free(page)?;
    }
    Ok(())
}

/// Pages of a chain, head first.
pub(crate) fn chain_pages(pager: &Pager, head: PageId) -> CoreResult<Vec<PageId>> {
    let mut pages = Vec::new();
    collect_chain(pager, head, &mut pages)?;
    Ok(pages)
}

fn collect_chain(pager: &Pager, head: PageId, pages: &mut Vec<PageId>) -> CoreResult<()> {
    let mut current = Some(head);
    while let Some(page) = current {
        let bytes = blob_page(pager, page)?;
        pages.push(page);
        current = PageId::from_link(read_u64(&bytes, 8));
        check_cycle(pages.len(), pager)?;
    }
    Ok(())
}

fn visit_chain(pager: &Pager, head: PageId, mut f: impl FnMut(&[u8])) -> CoreResult<()> {
    let mut current = Some(head);
    let mut seen = 0usize;
    while let Some(page) = current {
        let bytes = blob_page(pager, page)?;
        let used = read_u32(&bytes, 16) as usize;
        if BLOB_HEADER + used > bytes.len() {
            return Err(CoreError::integrity(format!(
                "blob {page} claims {used} bytes"
            )));
        }
        f(&bytes);
        current = PageId::from_link(read_u64(&bytes, 8));
        seen += 1;
        check_cycle(seen, pager)?;
    }
    Ok(())
}

fn blob_page(pager: &Pager, page: PageId) -> CoreResult<std::sync::Arc<Vec<u8>>> {
    let bytes = pager.read(page)?;
    if bytes[0] != PageType::Blob as u8 {
        return Err(CoreError::integrity(format!("{page} is not a blob page")));
    }
    Ok(bytes)
}

fn check_cycle(seen: usize, pager: &Pager) -> CoreResult<()> {
    if seen as u64 > pager.gauges().page_count {
        return Err(CoreError::integrity("blob chain contains a cycle"));
    }
    Ok(())
}

/// Encodes a duplicate table: `| len (4) | bytes |` per record.
pub(crate) fn encode_table(records: &[Vec<u8>]) -> Vec<u8> {
    let total = records.iter().map(|r| 4 + r.len()).sum();
    let mut buf = Vec::with_capacity(total);
    for record in records {
        buf.extend_from_slice(&(record.len() as u32).to_le_bytes());
        buf.extend_from_slice(record);
    }
    buf
}

pub(crate) fn decode_table(head: PageId, data: &[u8], count: u32) -> CoreResult<Vec<Vec<u8>>> {
    let mut records = Vec::with_capacity(count as usize);
    let mut offset = 0;
    while offset < data.len() {
        if offset + 4 > data.len() {
            return Err(CoreError::integrity(format!(
                "duplicate table at {head} is truncated"
            )));
        }
        let len = read_u32(data, offset) as usize;
        offset += 4;
        if offset + len > data.len() {
            return Err(CoreError::integrity(format!(
                "duplicate table at {head} is truncated"
            )));
        }
        records.push(data[offset..offset + len].to_vec());
        offset += len;
    }
    if records.len() != count as usize {
        return Err(CoreError::integrity(format!(
            "duplicate table at {head} holds {} records, expected {count}",
            records.len()
        )));
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::page::{PageStore, StoreOptions};
    use crate::stats::EnvMetrics;
    use burrowdb_storage::InMemoryBackend;
    use std::sync::Arc;

    fn pager() -> Pager {
        let options = StoreOptions {
            page_size: 1024,
            ..StoreOptions::default()
        };
        let store = PageStore::create(Box::new(InMemoryBackend::new()), &options).unwrap();
        Pager::create(store, 1 << 20, false, Arc::new(EnvMetrics::new())).unwrap()
    }

    #[test]
    fn multi_page_blob() {
        let pager = pager();
        let data: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
        let head = write_blob(&pager, &data).unwrap();

        assert_eq!(read_blob_exact(&pager, head, 5000).unwrap(), data);
        assert_eq!(chain_pages(&pager, head).unwrap().len(), 5);

        let err = read_blob_exact(&pager, head, 4999).unwrap_err();
        assert_eq!(err.code(), ErrorCode::IntegrityViolated);
    }

    #[test]
    fn empty_blob_uses_one_page() {
        let pager = pager();
        let head = write_blob(&pager, &[]).unwrap();
        assert!(read_blob(&pager, head).unwrap().is_empty());
    }

    #[test]
    fn freed_pages_are_reused() {
        let pager = pager();
        let head = write_blob(&pager, &vec![7u8; 3000]).unwrap();
        let before = pager.gauges().page_count;
        free_blob(&pager, head).unwrap();
        assert_eq!(pager.gauges().freelist_pages, 3);

        write_blob(&pager, &vec![8u8; 3000]).unwrap();
        assert_eq!(pager.gauges().page_count, before);
        assert_eq!(pager.gauges().freelist_pages, 0);
    }

    #[test]
    fn table_codec() {
        let records = vec![b"a".to_vec(), Vec::new(), vec![9u8; 300]];
        let encoded = encode_table(&records);
        assert_eq!(
            decode_table(PageId(1), &encoded, 3).unwrap(),
            records
        );
        assert!(decode_table(PageId(1), &encoded, 4).is_err());
        assert!(decode_table(PageId(1), &encoded[..5], 3).is_err());
    }
}
