use crate::{decoder, enums::SortBy, volume_loader::sort_key};

use dicom::core::Tag;
use dicom::object::{FileDicomObject, InMemDicomObject, OpenFileOptions};
use dicom_dictionary_std::tags;
use rayon::prelude::*;
use serde::Serialize;
use std::{
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Cannot read directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One acquisition series found in a directory.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesDescriptor {
    /// Series Instance UID refined by the catalog's restriction attributes.
    pub id: String,
    pub description: Option<String>,
    /// Slice files in stacking order.
    pub files: Vec<PathBuf>,
}

/// Groups the slice files of a directory into series.
#[derive(Debug, Clone)]
pub struct SeriesCatalog {
    sort_by: SortBy,
    restrictions: Vec<Tag>,
}

impl Default for SeriesCatalog {
    fn default() -> Self {
        Self {
            sort_by: SortBy::default(),
            restrictions: vec![tags::SERIES_DATE],
        }
    }
}

struct Candidate {
    path: PathBuf,
    series_id: String,
    description: Option<String>,
    order: Option<f64>,
}

impl SeriesCatalog {
    #[must_use]
    pub fn with_sort_by(mut self, sort_by: SortBy) -> Self {
        self.sort_by = sort_by;
        self
    }

    /// Split series that share a UID but differ in `tag`.
    #[must_use]
    pub fn with_restriction(mut self, tag: Tag) -> Self {
        if !self.restrictions.contains(&tag) {
            self.restrictions.push(tag);
        }
        self
    }

    /// List the series stored directly in `directory`.
    ///
    /// Series are returned in order of first appearance when the directory
    /// entries are walked by file name. A directory without decodable
    /// slices yields an empty list.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory itself cannot be read.
    pub fn list_series(
        &self,
        directory: impl AsRef<Path>,
    ) -> Result<Vec<SeriesDescriptor>, CatalogError> {
        let directory = directory.as_ref();
        let capabilities = decoder::initialize();

        let mut paths: Vec<_> = fs::read_dir(directory)
            .map_err(|source| CatalogError::Io {
                path: directory.to_path_buf(),
                source,
            })?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .collect();
        paths.sort();

        let candidates: Vec<_> = paths
            .into_par_iter()
            .filter_map(|path| {
                let header = match OpenFileOptions::new()
                    .read_until(tags::PIXEL_DATA)
                    .open_file(&path)
                {
                    Ok(header) => header,
                    Err(err) => {
                        debug!(path = %path.display(), error = %err, "skipping non-DICOM file");
                        return None;
                    }
                };
                if !capabilities.can_decode(header.meta().transfer_syntax()) {
                    debug!(
                        path = %path.display(),
                        transfer_syntax = header.meta().transfer_syntax(),
                        "skipping file with undecodable transfer syntax"
                    );
                    return None;
                }
                self.candidate(path, &header)
            })
            .collect();

        let mut series: Vec<(SeriesDescriptor, Vec<Option<f64>>)> = Vec::new();
        for candidate in candidates {
            match series
                .iter_mut()
                .find(|(descriptor, _)| descriptor.id == candidate.series_id)
            {
                Some((descriptor, orders)) => {
                    descriptor.files.push(candidate.path);
                    orders.push(candidate.order);
                }
                None => series.push((
                    SeriesDescriptor {
                        id: candidate.series_id,
                        description: candidate.description,
                        files: vec![candidate.path],
                    },
                    vec![candidate.order],
                )),
            }
        }

        let series: Vec<_> = series
            .into_iter()
            .map(|(descriptor, orders)| self.order_files(descriptor, orders))
            .collect();
        debug!(directory = %directory.display(), count = series.len(), "series listed");
        Ok(series)
    }

    fn candidate(
        &self,
        path: PathBuf,
        header: &FileDicomObject<InMemDicomObject>,
    ) -> Option<Candidate> {
        let uid = read_string(header, tags::SERIES_INSTANCE_UID)?;
        // Rows and columns are required for anything carrying an image.
        header.element(tags::ROWS).ok()?;
        header.element(tags::COLUMNS).ok()?;

        let series_id = self
            .restrictions
            .iter()
            .filter_map(|&tag| read_string(header, tag))
            .fold(uid, |id, detail| format!("{id}.{detail}"));

        Some(Candidate {
            order: sort_key(header, self.sort_by),
            description: read_string(header, tags::SERIES_DESCRIPTION),
            series_id,
            path,
        })
    }

    fn order_files(
        &self,
        mut descriptor: SeriesDescriptor,
        orders: Vec<Option<f64>>,
    ) -> SeriesDescriptor {
        if matches!(self.sort_by, SortBy::None) {
            return descriptor;
        }
        let mut files: Vec<_> = orders.into_iter().zip(descriptor.files).collect();
        files.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        descriptor.files = files.into_iter().map(|(_, path)| path).collect();
        descriptor
    }
}

fn read_string(header: &FileDicomObject<InMemDicomObject>, tag: Tag) -> Option<String> {
    let value = header.element(tag).ok()?.to_str().ok()?;
    let value = value.trim_end_matches(['\0', ' ']).trim();
    (!value.is_empty()).then(|| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_directory_has_no_series() {
        let dir = tempfile::tempdir().unwrap();
        let series = SeriesCatalog::default().list_series(dir.path()).unwrap();
        assert!(series.is_empty());
    }

    #[test]
    fn non_dicom_files_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("notes.txt"), "not a slice").unwrap();
        fs::write(dir.path().join("image.dcm"), [0u8; 16]).unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();

        let series = SeriesCatalog::default().list_series(dir.path()).unwrap();
        assert!(series.is_empty());
    }

    #[test]
    fn missing_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing");
        assert!(matches!(
            SeriesCatalog::default().list_series(&missing),
            Err(CatalogError::Io { path, .. }) if path == missing
        ));
    }

    fn write_header(path: &Path, with_columns: bool) {
        use dicom::core::{DataElement, PrimitiveValue, VR};
        use dicom::object::FileMetaTableBuilder;

        let mut elements = vec![
            DataElement::new(tags::SOP_CLASS_UID, VR::UI, PrimitiveValue::from("1.2.840.10008.5.1.4.1.1.2")),
            DataElement::new(tags::SOP_INSTANCE_UID, VR::UI, PrimitiveValue::from("1.2.3.4.1")),
            DataElement::new(tags::SERIES_INSTANCE_UID, VR::UI, PrimitiveValue::from("1.2.3.4")),
            DataElement::new(tags::ROWS, VR::US, PrimitiveValue::from(2_u16)),
        ];
        if with_columns {
            elements.push(DataElement::new(tags::COLUMNS, VR::US, PrimitiveValue::from(2_u16)));
        }
        InMemDicomObject::from_element_iter(elements)
            .with_meta(
                FileMetaTableBuilder::new()
                    .transfer_syntax("1.2.840.10008.1.2.1")
                    .media_storage_sop_class_uid("1.2.840.10008.5.1.4.1.1.2")
                    .media_storage_sop_instance_uid("1.2.3.4.1"),
            )
            .unwrap()
            .write_to_file(path)
            .unwrap();
    }

    #[test]
    fn headers_without_image_size_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write_header(&dir.path().join("no-columns.dcm"), false);
        assert!(SeriesCatalog::default().list_series(dir.path()).unwrap().is_empty());

        write_header(&dir.path().join("complete.dcm"), true);
        let series = SeriesCatalog::default().list_series(dir.path()).unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].id, "1.2.3.4");
        assert_eq!(series[0].files, vec![dir.path().join("complete.dcm")]);
    }

    #[test]
    fn restrictions_are_not_duplicated() {
        let catalog = SeriesCatalog::default()
            .with_restriction(tags::SERIES_DATE)
            .with_restriction(tags::ACQUISITION_NUMBER);
        assert_eq!(
            catalog.restrictions,
            vec![tags::SERIES_DATE, tags::ACQUISITION_NUMBER]
        );
    }
}
