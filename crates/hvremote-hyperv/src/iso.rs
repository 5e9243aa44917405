//! ISO image assembly on the Hyper-V host
//!
//! Sources are uploaded from the controller, the image is built on the host
//! with IMAPI2 and the result is verified with an existence probe. An ISO
//! that already exists is left alone, so repeating the operation is cheap.

use std::path::Path;

use hvremote_exec::{Dialect, ExecContext, ScriptRunner, Template};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::client::HypervClient;
use crate::error::HypervError;

/// Physical media profile the image is laid out for (IMAPI_MEDIA_PHYSICAL_TYPE)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(into = "u32", try_from = "u32")]
#[repr(u32)]
pub enum IsoMediaType {
    Unknown = 0x0,
    CdRom = 0x1,
    CdR = 0x2,
    CdRw = 0x3,
    DvdRom = 0x4,
    DvdRam = 0x5,
    DvdPlusR = 0x6,
    DvdPlusRw = 0x7,
    DvdPlusRDualLayer = 0x8,
    DvdDashR = 0x9,
    DvdDashRw = 0xa,
    DvdDashRDualLayer = 0xb,
    Disk = 0xc,
    #[default]
    DvdPlusRwDualLayer = 0xd,
    HdDvdRom = 0xe,
    HdDvdR = 0xf,
    HdDvdRam = 0x10,
    BdRom = 0x11,
    BdR = 0x12,
    BdRe = 0x13,
}

impl IsoMediaType {
    const ALL: [IsoMediaType; 20] = [
        IsoMediaType::Unknown,
        IsoMediaType::CdRom,
        IsoMediaType::CdR,
        IsoMediaType::CdRw,
        IsoMediaType::DvdRom,
        IsoMediaType::DvdRam,
        IsoMediaType::DvdPlusR,
        IsoMediaType::DvdPlusRw,
        IsoMediaType::DvdPlusRDualLayer,
        IsoMediaType::DvdDashR,
        IsoMediaType::DvdDashRw,
        IsoMediaType::DvdDashRDualLayer,
        IsoMediaType::Disk,
        IsoMediaType::DvdPlusRwDualLayer,
        IsoMediaType::HdDvdRom,
        IsoMediaType::HdDvdR,
        IsoMediaType::HdDvdRam,
        IsoMediaType::BdRom,
        IsoMediaType::BdR,
        IsoMediaType::BdRe,
    ];

    /// Blu-ray recordable media; boot images are not supported on these
    #[must_use]
    pub fn is_blu_ray(self) -> bool {
        matches!(
            self,
            IsoMediaType::BdRom | IsoMediaType::BdR | IsoMediaType::BdRe
        )
    }
}

impl From<IsoMediaType> for u32 {
    fn from(media: IsoMediaType) -> Self {
        media as u32
    }
}

impl TryFrom<u32> for IsoMediaType {
    type Error = HypervError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        IsoMediaType::ALL
            .into_iter()
            .find(|m| *m as u32 == value)
            .ok_or_else(|| HypervError::InvalidValue(format!("media type {value:#x}")))
    }
}

/// File systems written into the image (FsiFileSystems)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(into = "u32", try_from = "u32")]
#[repr(u32)]
pub enum IsoFileSystemType {
    None = 0x0,
    Iso9660 = 0x1,
    Joliet = 0x2,
    Iso9660Joliet = 0x3,
    Udf = 0x4,
    JolietUdf = 0x6,
    All = 0x7,
    /// Let IMAPI pick the defaults for the media type
    #[default]
    Unknown = 0x4000_0000,
}

impl From<IsoFileSystemType> for u32 {
    fn from(fs: IsoFileSystemType) -> Self {
        fs as u32
    }
}

impl TryFrom<u32> for IsoFileSystemType {
    type Error = HypervError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Ok(match value {
            0x0 => IsoFileSystemType::None,
            0x1 => IsoFileSystemType::Iso9660,
            0x2 => IsoFileSystemType::Joliet,
            0x3 => IsoFileSystemType::Iso9660Joliet,
            0x4 => IsoFileSystemType::Udf,
            0x6 => IsoFileSystemType::JolietUdf,
            0x7 => IsoFileSystemType::All,
            0x4000_0000 => IsoFileSystemType::Unknown,
            other => {
                return Err(HypervError::InvalidValue(format!(
                    "file system type {other:#x}"
                )));
            }
        })
    }
}

/// Description of an ISO image and where its pieces live
///
/// `source_*` paths are local to the controller, `destination_*` are remote
/// paths as configured and `resolve_destination_*` are the same remote paths
/// with variables already expanded. Every remote path is used literally on
/// the host; nothing here expands `$env:` references, so the existence
/// probes and the assembly script always see the same path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct IsoImage {
    pub source_iso_file_path: String,
    pub source_iso_file_path_hash: String,
    pub source_zip_file_path: String,
    pub source_zip_file_path_hash: String,
    pub source_boot_file_path: String,
    pub source_boot_file_path_hash: String,
    pub destination_iso_file_path: String,
    pub destination_zip_file_path: String,
    pub destination_boot_file_path: String,
    pub media: IsoMediaType,
    pub file_system: IsoFileSystemType,
    pub volume_name: String,
    pub resolve_destination_iso_file_path: String,
    pub resolve_destination_zip_file_path: String,
    pub resolve_destination_boot_file_path: String,
}

fn first_non_empty<'a>(a: &'a str, b: &'a str) -> Option<&'a str> {
    [a, b].into_iter().find(|p| !p.is_empty())
}

impl IsoImage {
    /// Remote path of the ISO, resolved form preferred
    #[must_use]
    pub fn iso_path(&self) -> Option<&str> {
        first_non_empty(
            &self.resolve_destination_iso_file_path,
            &self.destination_iso_file_path,
        )
    }

    /// Where a source goes on the host: its own destination, else next to the ISO
    fn upload_target(&self, resolved: &str, configured: &str, iso_path: &str) -> String {
        match first_non_empty(resolved, configured) {
            Some(path) => path.to_string(),
            None => {
                let dialect = Dialect::Windows;
                match dialect.parent(iso_path) {
                    Some(dir) => format!("{}{}", dir.trim_end_matches('\\'), dialect.separator()),
                    None => String::new(),
                }
            }
        }
    }
}

/// What `create_or_update_iso_image` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsoOutcome {
    /// The image was built (or copied) on this call
    Created,
    /// The destination already existed; nothing was touched
    AlreadyPresent,
}

const CREATE_OR_UPDATE_ISO_IMAGE: Template<'static> = Template::new(
    "CreateOrUpdateIsoImage",
    r#"$ErrorActionPreference = 'Stop'
$spec = @'
{{IsoImageJson}}
'@ | ConvertFrom-Json

$isoPath = $spec.ResolveDestinationIsoFilePath
$zipPath = $spec.ResolveDestinationZipFilePath
$bootPath = $spec.ResolveDestinationBootFilePath
$volumeName = if ($spec.VolumeName) { $spec.VolumeName } else { 'UNTITLED' }

if (Test-Path -LiteralPath $isoPath) { return }
if (-not (Test-Path -LiteralPath $zipPath)) { throw "source archive not found: $zipPath" }
if ($bootPath -and -not (Test-Path -LiteralPath $bootPath)) { throw "boot image not found: $bootPath" }

if (-not ('HvRemote.IsoWriter' -as [type])) {
    $source = @'
namespace HvRemote {
    public static class IsoWriter {
        public static unsafe void Write(string path, object stream, int blockSize, int totalBlocks) {
            int read = 0;
            byte[] buffer = new byte[blockSize];
            var com = (System.Runtime.InteropServices.ComTypes.IStream)stream;
            using (var file = System.IO.File.OpenWrite(path)) {
                while (totalBlocks-- > 0) {
                    com.Read(buffer, blockSize, (System.IntPtr)(&read));
                    file.Write(buffer, 0, read);
                }
            }
        }
    }
}
'@
    if ($PSVersionTable.PSVersion.Major -ge 7) {
        Add-Type -CompilerOptions '/unsafe' -TypeDefinition $source
    } else {
        $options = New-Object System.CodeDom.Compiler.CompilerParameters
        $options.CompilerOptions = '/unsafe'
        Add-Type -CompilerParameters $options -TypeDefinition $source
    }
}

$workDir = Join-Path ([System.IO.Path]::GetTempPath()) ([System.IO.Path]::GetRandomFileName())
New-Item -ItemType Directory -Path $workDir | Out-Null
try {
    Expand-Archive -LiteralPath $zipPath -DestinationPath $workDir

    $image = New-Object -ComObject IMAPI2FS.MsftFileSystemImage
    $image.VolumeName = $volumeName
    $image.ChooseImageDefaultsForMediaType([int]$spec.Media)
    if ([int]$spec.FileSystem -ne 0x40000000) {
        $image.FileSystemsToCreate = [int]$spec.FileSystem
    }

    if ($bootPath) {
        $bootStream = New-Object -ComObject ADODB.Stream -Property @{ Type = 1 }
        $bootStream.Open()
        $bootStream.LoadFromFile((Get-Item -LiteralPath $bootPath).FullName)
        $boot = New-Object -ComObject IMAPI2FS.BootOptions
        $boot.AssignBootImage($bootStream)
        $image.BootImageOptions = $boot
    }

    Get-ChildItem -LiteralPath $workDir | ForEach-Object { $image.Root.AddTree($_.FullName, $true) }

    $parent = Split-Path -Parent $isoPath
    if ($parent) { New-Item -ItemType Directory -Force -Path $parent | Out-Null }
    $result = $image.CreateResultImage()
    [HvRemote.IsoWriter]::Write($isoPath, $result.ImageStream, $result.BlockSize, $result.TotalBlocks)
} finally {
    Remove-Item -LiteralPath $workDir -Recurse -Force -ErrorAction SilentlyContinue
}
"#,
);

const GET_ISO_IMAGE: Template<'static> = Template::new(
    "GetIsoImage",
    r#"$ErrorActionPreference = 'Stop'
$isoPath = '{{ResolveDestinationIsoFilePath}}'

if (Test-Path -LiteralPath $isoPath -PathType Leaf) {
    ConvertTo-Json -Compress -InputObject @{
        ResolveDestinationIsoFilePath = $isoPath
        Media = 0
        FileSystem = 0
    }
} else {
    '{}'
}
"#,
);

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct IsoImageJsonArgs {
    iso_image_json: String,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct GetIsoImageArgs<'a> {
    resolve_destination_iso_file_path: &'a str,
}

impl HypervClient {
    /// Build the ISO described by `image` unless it already exists
    ///
    /// A local `source_iso_file_path` is uploaded as the ISO itself.
    /// Otherwise the zip archive (and boot image, if any) are uploaded and
    /// assembled on the host; the host's scratch directory is removed
    /// whether assembly succeeds or not.
    ///
    /// # Errors
    /// Returns `HypervError::MissingSource` without a source archive,
    /// `HypervError::InvalidValue` for a boot image on Blu-ray media,
    /// `HypervError::IsoNotCreated` if the ISO is absent after assembly, or
    /// the underlying execution error
    #[instrument(skip(self, ctx, image), fields(iso = ?image.iso_path()))]
    pub async fn create_or_update_iso_image(
        &self,
        ctx: &ExecContext,
        image: &IsoImage,
    ) -> Result<IsoOutcome, HypervError> {
        let iso_path = image
            .iso_path()
            .ok_or_else(|| HypervError::InvalidValue("destination ISO path is empty".to_string()))?
            .to_string();

        if self.remote_file_exists(ctx, &iso_path).await? {
            info!("ISO image already present, skipping assembly");
            return Ok(IsoOutcome::AlreadyPresent);
        }

        if !image.source_iso_file_path.is_empty() {
            self.remote_file_upload(ctx, Path::new(&image.source_iso_file_path), &iso_path)
                .await?;
            return self.verify_created(ctx, &iso_path).await;
        }

        if image.source_zip_file_path.is_empty() {
            return Err(HypervError::MissingSource(
                "source_zip_file_path is required when no source ISO is given".to_string(),
            ));
        }
        let has_boot = !image.source_boot_file_path.is_empty();
        if has_boot && image.media.is_blu_ray() {
            return Err(HypervError::InvalidValue(format!(
                "boot images are not supported on {:?} media",
                image.media
            )));
        }

        let mut resolved = image.clone();
        resolved.resolve_destination_iso_file_path.clone_from(&iso_path);

        let zip_target = image.upload_target(
            &image.resolve_destination_zip_file_path,
            &image.destination_zip_file_path,
            &iso_path,
        );
        resolved.resolve_destination_zip_file_path = self
            .remote_file_upload(ctx, Path::new(&image.source_zip_file_path), &zip_target)
            .await?;

        if has_boot {
            let boot_target = image.upload_target(
                &image.resolve_destination_boot_file_path,
                &image.destination_boot_file_path,
                &iso_path,
            );
            resolved.resolve_destination_boot_file_path = self
                .remote_file_upload(ctx, Path::new(&image.source_boot_file_path), &boot_target)
                .await?;
        }

        let args = IsoImageJsonArgs {
            iso_image_json: serde_json::to_string(&resolved)?,
        };
        debug!(zip = %resolved.resolve_destination_zip_file_path, "assembling ISO image");
        self.transport()
            .run_script(ctx, &CREATE_OR_UPDATE_ISO_IMAGE, &args)
            .await?;

        self.verify_created(ctx, &iso_path).await
    }

    async fn verify_created(
        &self,
        ctx: &ExecContext,
        iso_path: &str,
    ) -> Result<IsoOutcome, HypervError> {
        if self.remote_file_exists(ctx, iso_path).await? {
            info!(iso = %iso_path, "ISO image created");
            Ok(IsoOutcome::Created)
        } else {
            Err(HypervError::IsoNotCreated(iso_path.to_string()))
        }
    }

    /// Look up an ISO on the host; `None` when it does not exist
    ///
    /// # Errors
    /// Returns the underlying execution error
    #[instrument(skip(self, ctx))]
    pub async fn get_iso_image(
        &self,
        ctx: &ExecContext,
        resolve_destination_iso_file_path: &str,
    ) -> Result<Option<IsoImage>, HypervError> {
        let image: IsoImage = self
            .transport()
            .run_script_with_result(
                ctx,
                &GET_ISO_IMAGE,
                &GetIsoImageArgs {
                    resolve_destination_iso_file_path,
                },
            )
            .await?;

        Ok((!image.resolve_destination_iso_file_path.is_empty()).then_some(image))
    }

    /// Remove an ISO from the host
    ///
    /// # Errors
    /// Returns the underlying execution error
    pub async fn delete_iso_image(
        &self,
        ctx: &ExecContext,
        resolve_destination_iso_file_path: &str,
    ) -> Result<(), HypervError> {
        self.remote_file_delete(ctx, resolve_destination_iso_file_path)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iso_image_json_is_pascal_case_with_numeric_enums() {
        let image = IsoImage {
            destination_iso_file_path: "C:\\Iso\\tools.iso".to_string(),
            media: IsoMediaType::DvdPlusRwDualLayer,
            ..IsoImage::default()
        };

        let json: serde_json::Value = serde_json::to_value(&image).unwrap();
        assert_eq!(json["DestinationIsoFilePath"], "C:\\Iso\\tools.iso");
        assert_eq!(json["Media"], 13);
        assert_eq!(json["FileSystem"], 0x4000_0000);
    }

    #[test]
    fn test_empty_object_decodes_to_defaults() {
        let image: IsoImage = serde_json::from_str("{}").unwrap();
        assert_eq!(image, IsoImage::default());
        assert_eq!(image.iso_path(), None);
    }

    #[test]
    fn test_unknown_media_value_is_rejected() {
        assert!(serde_json::from_str::<IsoMediaType>("20").is_err());
        assert_eq!(
            serde_json::from_str::<IsoMediaType>("17").unwrap(),
            IsoMediaType::BdRom
        );
        assert!(IsoMediaType::BdRe.is_blu_ray());
    }

    #[test]
    fn test_upload_target_defaults_next_to_iso() {
        let image = IsoImage::default();
        assert_eq!(
            image.upload_target("", "", "C:\\Iso\\tools.iso"),
            "C:\\Iso\\"
        );
        assert_eq!(image.upload_target("", "D:\\src.zip", "C:\\Iso\\a.iso"), "D:\\src.zip");
    }

    #[test]
    fn test_scripts_use_paths_literally() {
        let args = GetIsoImageArgs {
            resolve_destination_iso_file_path: "C:\\$env:USERNAME\\tools.iso",
        };
        let rendered = GET_ISO_IMAGE.render(&args).unwrap();

        assert!(rendered.as_str().contains("$isoPath = 'C:\\$env:USERNAME\\tools.iso'"));
        assert!(!GET_ISO_IMAGE.source().contains("ExpandString"));
        assert!(!CREATE_OR_UPDATE_ISO_IMAGE.source().contains("ExpandString"));
    }

    #[test]
    fn test_assembly_script_cleans_up_scratch_directory() {
        let source = CREATE_OR_UPDATE_ISO_IMAGE.source();
        assert!(source.contains("try {"));
        assert!(source.contains("} finally {\n    Remove-Item -LiteralPath $workDir"));
    }
}
