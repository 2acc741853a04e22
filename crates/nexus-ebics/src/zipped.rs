//! Order-data containers.
//!
//! Banks deliver camt documents either as a bare XML document or as a ZIP
//! holding several of them; HTD and friends are always bare XML. Everything
//! funnels through [`extract_documents`].

use std::io::{Cursor, Read as _};

use zip::ZipArchive;

use crate::error::{Error, Result};

const ZIP_MAGIC: &[u8; 2] = b"PK";

/// Split downloaded order data into its member documents.
pub fn extract_documents(order_data: &[u8]) -> Result<Vec<Vec<u8>>> {
  if order_data.len() < 2 || &order_data[..2] != ZIP_MAGIC {
    return Ok(vec![order_data.to_vec()]);
  }

  let mut archive = ZipArchive::new(Cursor::new(order_data))
    .map_err(|e| Error::PostProcess(format!("unreadable ZIP container: {e}")))?;

  let mut documents = Vec::with_capacity(archive.len());
  for index in 0..archive.len() {
    let mut file = archive
      .by_index(index)
      .map_err(|e| Error::PostProcess(format!("ZIP entry {index}: {e}")))?;
    if file.is_dir() {
      continue;
    }
    let mut content = Vec::with_capacity(file.size() as usize);
    file
      .read_to_end(&mut content)
      .map_err(|e| Error::PostProcess(format!("ZIP entry {index}: {e}")))?;
    documents.push(content);
  }
  Ok(documents)
}

#[cfg(test)]
mod tests {
  use std::io::Write as _;

  use zip::write::SimpleFileOptions;

  use super::*;

  #[test]
  fn bare_xml_passes_through() {
    let docs = extract_documents(b"<Document/>").unwrap();
    assert_eq!(docs, vec![b"<Document/>".to_vec()]);
  }

  #[test]
  fn zip_container_yields_every_member() {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, body) in [("a.xml", "<A/>"), ("b.xml", "<B/>")] {
      writer.start_file(name, SimpleFileOptions::default()).unwrap();
      writer.write_all(body.as_bytes()).unwrap();
    }
    let bytes = writer.finish().unwrap().into_inner();

    let docs = extract_documents(&bytes).unwrap();
    assert_eq!(docs.len(), 2);
    assert_eq!(docs[0], b"<A/>");
    assert_eq!(docs[1], b"<B/>");
  }

  #[test]
  fn truncated_zip_is_a_postprocess_error() {
    assert!(matches!(
      extract_documents(b"PK\x03\x04broken"),
      Err(Error::PostProcess(_))
    ));
  }
}
