use crate::core::error::{HostError, HostResult};

use super::{AuthoringHost, DocumentHandle};

pub const PART_NUMBER_KEY: &str = "Part Number";

/// Property collections searched for the part number, in priority order
pub const PROPERTY_SETS: [&str; 4] = [
    "Design Tracking Properties",
    "Inventor Summary Information",
    "Inventor Document Summary Information",
    "Inventor User Defined Properties",
];

/// First non-empty value of `key` across `PROPERTY_SETS`.
///
/// A set that does not exist on a document is skipped; any other host failure
/// is returned to the caller.
pub fn read_property_in_order(
    host: &mut dyn AuthoringHost,
    handle: DocumentHandle,
    key: &str,
) -> HostResult<Option<String>> {
    for set in PROPERTY_SETS {
        match host.read_property(handle, set, key) {
            Ok(Some(value)) if !value.trim().is_empty() => return Ok(Some(value.trim().to_string())),
            Ok(_) => continue,
            Err(HostError::NotFound(_)) | Err(HostError::NotSupported(_)) => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(None)
}

pub fn read_part_number(
    host: &mut dyn AuthoringHost,
    handle: DocumentHandle,
) -> HostResult<Option<String>> {
    read_property_in_order(host, handle, PART_NUMBER_KEY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::json_store::StoredDocument;
    use crate::host::JsonStoreHost;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn open(doc: &StoredDocument) -> (TempDir, JsonStoreHost, DocumentHandle) {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("BASE_200.ipt");
        doc.save(&path).unwrap();
        let mut host = JsonStoreHost::new();
        let handle = host.open(&path, false).unwrap();
        (temp, host, handle)
    }

    #[test]
    fn test_later_set_used_when_earlier_is_blank() {
        let mut doc = StoredDocument::new(None);
        doc.properties.insert(
            PROPERTY_SETS[0].to_string(),
            BTreeMap::from([(PART_NUMBER_KEY.to_string(), "  ".to_string())]),
        );
        doc.properties.insert(
            PROPERTY_SETS[3].to_string(),
            BTreeMap::from([(PART_NUMBER_KEY.to_string(), " ABC_200 ".to_string())]),
        );
        let (_temp, mut host, handle) = open(&doc);

        assert_eq!(
            read_part_number(&mut host, handle).unwrap(),
            Some("ABC_200".to_string())
        );
    }

    #[test]
    fn test_missing_part_number() {
        let (_temp, mut host, handle) = open(&StoredDocument::new(None));
        assert_eq!(read_part_number(&mut host, handle).unwrap(), None);
    }
}
