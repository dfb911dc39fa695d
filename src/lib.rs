//! Reader for MSIX/AppX application packages.
//!
//! A package is a zip container whose payload integrity is certified by a
//! companion block map: per-file SHA-256 hashes over fixed 64 KiB plaintext
//! windows. [`MsixPackage`] joins the two and exposes each payload file as
//! a seekable stream that verifies every byte against the block map before
//! handing it out.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

pub mod blockmap;
pub mod blockstream;
pub mod error;
pub mod inflate;
pub mod stream;
pub mod utils;
pub mod zip;

pub use error::{Error, Result};

use blockmap::BlockMap;
use stream::{share, FileStream, FileStreamMode, PackageStream, SharedStream};
use zip::ZipArchive;

pub const APPX_BLOCK_MAP_XML: &str = "AppxBlockMap.xml";
pub const APPX_MANIFEST_XML: &str = "AppxManifest.xml";
pub const APPX_SIGNATURE_P7X: &str = "AppxSignature.p7x";
pub const CODE_INTEGRITY_CAT: &str = "AppxMetadata/CodeIntegrity.cat";
pub const CONTENT_TYPES_XML: &str = "[Content_Types].xml";

/// Container entries that are not payload and therefore not tracked by the
/// block map.
const FOOTPRINT_FILES: [&str; 4] = [
    APPX_BLOCK_MAP_XML,
    APPX_SIGNATURE_P7X,
    CONTENT_TYPES_XML,
    CODE_INTEGRITY_CAT,
];

/// Which validation policies run at package open. The three CLI-visible
/// flags map onto the unpack tool's `--mv`, `--sv` and `--ss`;
/// `skip_payload_coverage` additionally disables the check that every
/// non-footprint container entry is described in the block map.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValidationOptions {
    pub skip_manifest_validation: bool,
    pub allow_unknown_signature_origin: bool,
    pub skip_signature_enforcement: bool,
    pub skip_payload_coverage: bool,
}

impl ValidationOptions {
    pub fn runs(&self, kind: ValidationKind) -> bool {
        match kind {
            ValidationKind::Manifest => !self.skip_manifest_validation,
            ValidationKind::Signature => !self.skip_signature_enforcement,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationKind {
    Manifest,
    Signature,
}

/// A pluggable validation policy. Manifest and signature content checks
/// live outside the core; implementations receive the opened package and
/// are selected by [`ValidationOptions`].
pub trait Validator {
    fn kind(&self) -> ValidationKind;
    fn validate(&self, package: &MsixPackage) -> Result<()>;
}

/// An opened app package: the parsed zip container joined with its block
/// map. Metadata is read eagerly at open and immutable afterwards; entry
/// streams are created lazily and own their mutable state.
#[derive(Debug)]
pub struct MsixPackage {
    zip: ZipArchive,
    block_map: BlockMap,
    options: ValidationOptions,
}

impl MsixPackage {
    pub fn open<P: AsRef<Path>>(path: P, options: ValidationOptions) -> Result<Self> {
        let file = FileStream::open(path, FileStreamMode::Read)?;
        Self::from_stream(share(file), options)
    }

    pub fn from_stream(stream: SharedStream, options: ValidationOptions) -> Result<Self> {
        let zip = ZipArchive::parse(stream)?;

        if !zip.contains(APPX_BLOCK_MAP_XML) {
            return Err(Error::FileNotFound(format!(
                "{APPX_BLOCK_MAP_XML} not in package"
            )));
        }
        let mut block_map_part = zip.open(APPX_BLOCK_MAP_XML)?;
        let block_map = BlockMap::from_stream(block_map_part.as_mut())?;
        drop(block_map_part);

        let package = Self {
            zip,
            block_map,
            options,
        };
        package.cross_check()?;

        if options.runs(ValidationKind::Manifest) && !package.block_map.contains(APPX_MANIFEST_XML)
        {
            return Err(Error::FileNotFound(format!(
                "{APPX_MANIFEST_XML} not in package"
            )));
        }
        if options.runs(ValidationKind::Signature) && !package.zip.contains(APPX_SIGNATURE_P7X) {
            return Err(Error::FileNotFound(format!(
                "{APPX_SIGNATURE_P7X} not in package"
            )));
        }

        log::debug!(
            "opened package: {} block map files, {} container entries",
            package.block_map.files().count(),
            package.zip.entries().count()
        );
        Ok(package)
    }

    /// Verify the block map and the zip container agree: every block-map
    /// file exists in the container with the declared local-file-header
    /// length and uncompressed size, and every non-footprint container
    /// entry is accounted for by the block map.
    fn cross_check(&self) -> Result<()> {
        let mut covered = HashSet::new();
        for file in self.block_map.files() {
            let container_name = utils::encode_file_name(&file.name);
            let entry = self.zip.entry(&container_name).map_err(|_| {
                Error::FileNotFound(format!(
                    "'{}' described in block map but not in package",
                    file.name
                ))
            })?;
            if entry.lfh_size != file.lfh_size {
                return Err(Error::BlockMapSemanticError(format!(
                    "'{}' local file header is {} bytes, block map declares {}",
                    file.name, entry.lfh_size, file.lfh_size
                )));
            }
            if entry.uncompressed_size != file.uncompressed_size {
                return Err(Error::BlockMapSemanticError(format!(
                    "'{}' is {} bytes in the container, block map declares {}",
                    file.name, entry.uncompressed_size, file.uncompressed_size
                )));
            }
            covered.insert(container_name);
        }

        if !self.options.skip_payload_coverage {
            for entry in self.zip.entries() {
                if FOOTPRINT_FILES.contains(&entry.name.as_str()) {
                    continue;
                }
                if !covered.contains(&entry.name) {
                    return Err(Error::BlockMapSemanticError(format!(
                        "payload file '{}' not described in block map",
                        entry.name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Logical file names in block map document order.
    pub fn files(&self) -> impl Iterator<Item = &str> {
        self.block_map.files().map(|f| f.name.as_str())
    }

    pub fn block_map(&self) -> &BlockMap {
        &self.block_map
    }

    pub fn zip(&self) -> &ZipArchive {
        &self.zip
    }

    pub fn options(&self) -> ValidationOptions {
        self.options
    }

    /// Open a payload file as verified plaintext. Stored entries read
    /// straight out of the container; deflated entries go through the
    /// inflate stream. Either way the block-map layer checks every window
    /// before the caller sees it.
    pub fn stream(&self, name: &str) -> Result<Box<dyn PackageStream>> {
        let file = self.block_map.file(name)?;
        let container_name = utils::encode_file_name(&file.name);
        let inner = self.zip.open(&container_name)?;
        let validated = self.block_map.validation_stream(name, inner)?;
        Ok(Box::new(validated))
    }

    /// Open a footprint entry (block map, signature, ...) without block-map
    /// verification; those parts are certified elsewhere.
    pub fn footprint_stream(&self, name: &str) -> Result<Box<dyn PackageStream>> {
        if !FOOTPRINT_FILES.contains(&name) {
            return Err(Error::InvalidParameter(format!(
                "'{name}' is not a footprint file"
            )));
        }
        self.zip.open(name)
    }

    /// Run the given external validators, honoring the package's
    /// validation options.
    pub fn run_validators(&self, validators: &[&dyn Validator]) -> Result<()> {
        for validator in validators {
            if self.options.runs(validator.kind()) {
                validator.validate(self)?;
            }
        }
        Ok(())
    }

    /// Write every block-map file to `directory`, verified, in document
    /// order. The first failure aborts; files already written stay in
    /// place.
    pub fn unpack<P: AsRef<Path>>(&self, directory: P) -> Result<()> {
        let directory = directory.as_ref();
        for file in self.block_map.files() {
            log::info!(
                "unpacking {} ({})",
                file.name,
                utils::get_filesize_with_unit(file.uncompressed_size)
            );
            let mut source = self.stream(&file.name)?;
            let mut target = create_target_file(directory, &file.name)?;
            stream::copy(source.as_mut(), &mut target)?;
        }
        Ok(())
    }

    /// Write the non-payload footprint parts to `directory`: the block map
    /// itself plus the signature and code-integrity parts when present.
    /// `[Content_Types].xml` is never implicitly unpacked.
    pub fn extract_footprint_files<P: AsRef<Path>>(&self, directory: P) -> Result<()> {
        let directory = directory.as_ref();
        for name in [APPX_BLOCK_MAP_XML, APPX_SIGNATURE_P7X, CODE_INTEGRITY_CAT] {
            if !self.zip.contains(name) {
                continue;
            }
            log::info!("unpacking {name}");
            let mut source = self.zip.open(name)?;
            let mut target = create_target_file(directory, name)?;
            stream::copy(source.as_mut(), &mut target)?;
        }
        Ok(())
    }
}

/// Resolve a logical name under the output directory, translating the
/// archive's separators to the host's, and open a write stream there.
fn create_target_file(directory: &Path, logical_name: &str) -> Result<FileStream> {
    let relative = match cfg!(windows) {
        true => logical_name.to_owned(),
        false => logical_name.replace('\\', "/"),
    };
    let target: PathBuf = directory.join(relative);
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| Error::FileWrite(format!("{}: {e}", parent.display())))?;
    }
    FileStream::open(&target, FileStreamMode::Write)
}

/// The unpack driver behind `makemsix unpack`: open the package with the
/// selected validation policies and write the verified payload plus the
/// footprint parts to `directory`.
pub fn unpack_package<P: AsRef<Path>, Q: AsRef<Path>>(
    package: P,
    directory: Q,
    options: ValidationOptions,
) -> Result<()> {
    let package = MsixPackage::open(package, options)?;
    package.extract_footprint_files(directory.as_ref())?;
    package.unpack(directory.as_ref())
}
