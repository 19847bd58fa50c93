//! Project composer (C9): turns a freshly extracted shell-project directory
//! plus a target package/display name, game assets, an optional icon, and
//! plugin binaries into a Gradle project ready to build.

use std::path::{Path, PathBuf};

use lazy_static::lazy_static;
use regex::Regex;
use snafu::{ensure, ResultExt, Snafu};

use crate::fetch::Fetcher;

pub const TARGET_SDK_VERSION: u32 = 34;
pub const COMPILE_SDK_VERSION: u32 = 34;
pub const MIN_SDK_VERSION: u32 = 21;
pub const SUPPORTED_ABIS: &[&str] = &["arm64-v8a", "armeabi-v7a", "x86", "x86_64"];
const MIPMAP_DENSITIES: &[(&str, u32)] = &[
    ("mdpi", 48),
    ("hdpi", 72),
    ("xhdpi", 96),
    ("xxhdpi", 144),
    ("xxxhdpi", 192),
];
const DEFAULT_ICON_COLOR: [u8; 3] = [100, 80, 160];

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("shell APK not found at {}", path.display()))]
    ShellApkMissing { path: PathBuf },

    #[snafu(display("shell APK at {} contains no jniLibs matching lib/<abi>/*.so", path.display()))]
    JniLibsNotFound { path: PathBuf },

    #[snafu(display("failed to read shell APK as a zip: {source}"))]
    ZipRead { source: zip::result::ZipError },

    #[snafu(display("failed to fetch companion source {name}: {source}"))]
    CompanionFetch {
        name: String,
        source: crate::fetch::Error,
    },

    #[snafu(display("build.gradle not found at {}", path.display()))]
    BuildGradleMissing { path: PathBuf },

    #[snafu(display("AndroidManifest.xml not found at {}", path.display()))]
    ManifestMissing { path: PathBuf },

    #[snafu(display("I/O error at {}: {source}", path.display()))]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("failed to encode default icon: {source}"))]
    IconEncode { source: ::image::ImageError },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone)]
pub struct PluginBinary {
    pub name: String,
    pub abi: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct ComposeOptions<'a> {
    pub package_name: &'a str,
    pub app_name: &'a str,
    pub assets_dir: Option<&'a Path>,
    pub icon_path: Option<&'a Path>,
    pub plugins: &'a [PluginBinary],
}

lazy_static! {
    static ref ANDROID_BLOCK: Regex = Regex::new(r"(android\s*\{)").unwrap();
    static ref COMPILE_SDK: Regex = Regex::new(r"compileSdkVersion\s+\d+").unwrap();
    static ref MIN_SDK: Regex = Regex::new(r"minSdkVersion\s+\d+").unwrap();
    static ref TARGET_SDK: Regex = Regex::new(r"targetSdkVersion\s+\d+").unwrap();
    static ref APPLICATION_ID: Regex = Regex::new(r#"applicationId\s+"[^"]+""#).unwrap();
    static ref CMAKE_BLOCK: Regex =
        Regex::new(r"(?s)\s*externalNativeBuild\s*\{[^}]*cmake\s*\{[^}]*\}[^}]*\}").unwrap();
    static ref NDK_BUILD_BLOCK: Regex =
        Regex::new(r"(?s)\s*externalNativeBuild\s*\{[^}]*ndk\s*\{[^}]*\}[^}]*\}").unwrap();
    static ref NDK_ABI_BLOCK: Regex = Regex::new(r"(?s)\s*ndk\s*\{[^}]*abiFilters[^}]*\}").unwrap();
    static ref MANIFEST_PACKAGE_ATTR: Regex = Regex::new(r#"\s*package="[^"]*""#).unwrap();
    static ref APPLICATION_TAG: Regex = Regex::new(r"<application[^>]*>").unwrap();
    static ref ACTIVITY_TAG: Regex = Regex::new(r"<activity[^>]*(?:/>|>)").unwrap();
    static ref SERVICE_TAG: Regex = Regex::new(r"<service[^>]*(?:/>|>)").unwrap();
    static ref RECEIVER_TAG: Regex = Regex::new(r"<receiver[^>]*(?:/>|>)").unwrap();
    static ref APP_NAME_STRING: Regex =
        Regex::new(r#"(<string name="app_name">)[^<]*(</string>)"#).unwrap();
}

pub struct Composer {
    project_dir: PathBuf,
}

impl Composer {
    pub fn new(project_dir: PathBuf) -> Self {
        Composer { project_dir }
    }

    pub fn compose(&self, fetcher: &Fetcher, options: &ComposeOptions) -> Result<()> {
        self.extract_jni_libs()?;
        self.fetch_companion_sources(fetcher)?;
        self.place_plugins(options.plugins)?;
        self.generate_activity(options.package_name)?;
        self.rewrite_build_gradle(options.package_name)?;
        self.rewrite_manifest()?;
        self.write_strings_xml(options.app_name)?;

        if let Some(assets_dir) = options.assets_dir {
            self.place_assets(assets_dir)?;
        }

        match options.icon_path {
            Some(icon) if icon.exists() => self.place_icon(icon)?,
            _ => self.synthesize_default_icon()?,
        }

        Ok(())
    }

    fn jni_libs_dir(&self) -> PathBuf {
        self.project_dir.join("app/src/main/jniLibs")
    }

    fn extract_jni_libs(&self) -> Result<()> {
        let shell_apk = self.project_dir.join("krkrsdl2_universal.apk");
        ensure!(
            shell_apk.exists(),
            ShellApkMissingSnafu { path: shell_apk.clone() }
        );

        let file = std::fs::File::open(&shell_apk).context(IoSnafu { path: shell_apk.clone() })?;
        let mut archive = zip::ZipArchive::new(file).context(ZipReadSnafu)?;

        let jni_dir = self.jni_libs_dir();
        let mut extracted = 0usize;

        for i in 0..archive.len() {
            let mut entry = archive.by_index(i).context(ZipReadSnafu)?;
            let name = entry.name().to_string();
            if let Some(rest) = name.strip_prefix("lib/") {
                if !name.ends_with(".so") {
                    continue;
                }
                let mut parts = rest.splitn(2, '/');
                let abi = parts.next().unwrap_or("");
                let so_name = parts.next().unwrap_or("");
                if so_name.is_empty() || !SUPPORTED_ABIS.contains(&abi) {
                    continue;
                }

                let dest_dir = jni_dir.join(abi);
                std::fs::create_dir_all(&dest_dir).context(IoSnafu { path: dest_dir.clone() })?;
                let dest_path = dest_dir.join(so_name);
                let mut dest_file =
                    std::fs::File::create(&dest_path).context(IoSnafu { path: dest_path.clone() })?;
                std::io::copy(&mut entry, &mut dest_file).context(IoSnafu { path: dest_path })?;
                extracted += 1;
            }
        }

        ensure!(extracted > 0, JniLibsNotFoundSnafu { path: shell_apk });
        Ok(())
    }

    fn fetch_companion_sources(&self, fetcher: &Fetcher) -> Result<()> {
        let java_dir = self.project_dir.join("app/src/main/java/org/libsdl/app");
        std::fs::create_dir_all(&java_dir).context(IoSnafu { path: java_dir.clone() })?;

        for stem in crate::fetch::SDL2_COMPANION_FILES {
            let url = crate::fetch::sdl2_companion_url(stem);
            let bytes = fetcher.get(&url).context(CompanionFetchSnafu { name: stem.to_string() })?;
            let dest = java_dir.join(format!("{stem}.java"));
            std::fs::write(&dest, &bytes).context(IoSnafu { path: dest })?;
        }

        Ok(())
    }

    fn place_plugins(&self, plugins: &[PluginBinary]) -> Result<()> {
        let jni_dir = self.jni_libs_dir();
        for plugin in plugins {
            let dest_dir = jni_dir.join(&plugin.abi);
            std::fs::create_dir_all(&dest_dir).context(IoSnafu { path: dest_dir.clone() })?;
            let dest = dest_dir.join(format!("lib{}.so", plugin.name));
            std::fs::copy(&plugin.path, &dest).context(IoSnafu { path: dest })?;
        }
        Ok(())
    }

    fn generate_activity(&self, package_name: &str) -> Result<()> {
        let package_path = package_name.replace('.', "/");
        let java_dir = self.project_dir.join("app/src/main/java").join(&package_path);
        std::fs::create_dir_all(&java_dir).context(IoSnafu { path: java_dir.clone() })?;

        let old_dir = self.project_dir.join("app/src/main/java/pw/uyjulian/krkrsdl2");
        if old_dir.exists() {
            std::fs::remove_dir_all(&old_dir).context(IoSnafu { path: old_dir })?;
        }

        let java_file = java_dir.join("KirikiriSDL2Activity.java");
        let content = activity_java_source(package_name);
        std::fs::write(&java_file, content).context(IoSnafu { path: java_file })?;
        Ok(())
    }

    fn rewrite_build_gradle(&self, package_name: &str) -> Result<()> {
        let path = self.project_dir.join("app/build.gradle");
        ensure!(path.exists(), BuildGradleMissingSnafu { path: path.clone() });

        let mut content = std::fs::read_to_string(&path).context(IoSnafu { path: path.clone() })?;
        content = rewrite_build_gradle_text(&content, package_name);
        std::fs::write(&path, content).context(IoSnafu { path })?;
        Ok(())
    }

    fn rewrite_manifest(&self) -> Result<()> {
        let path = self.project_dir.join("app/src/main/AndroidManifest.xml");
        ensure!(path.exists(), ManifestMissingSnafu { path: path.clone() });

        let mut content = std::fs::read_to_string(&path).context(IoSnafu { path: path.clone() })?;
        content = rewrite_manifest_text(&content);
        std::fs::write(&path, content).context(IoSnafu { path })?;
        Ok(())
    }

    fn write_strings_xml(&self, app_name: &str) -> Result<()> {
        let values_dir = self.project_dir.join("app/src/main/res/values");
        std::fs::create_dir_all(&values_dir).context(IoSnafu { path: values_dir.clone() })?;
        let path = values_dir.join("strings.xml");

        let escaped = xml_escape(app_name);
        let content = if path.exists() {
            let existing = std::fs::read_to_string(&path).context(IoSnafu { path: path.clone() })?;
            APP_NAME_STRING
                .replace(&existing, format!("${{1}}{escaped}${{2}}"))
                .into_owned()
        } else {
            format!(
                "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<resources>\n    <string name=\"app_name\">{escaped}</string>\n</resources>\n"
            )
        };

        std::fs::write(&path, content).context(IoSnafu { path })?;
        Ok(())
    }

    fn place_assets(&self, assets_dir: &Path) -> Result<()> {
        let dest_dir = self.project_dir.join("app/src/main/assets/data");
        std::fs::create_dir_all(&dest_dir).context(IoSnafu { path: dest_dir.clone() })?;
        copy_tree(assets_dir, &dest_dir)
    }

    fn place_icon(&self, icon_path: &Path) -> Result<()> {
        let res_dir = self.project_dir.join("app/src/main/res");
        for (density, _) in MIPMAP_DENSITIES {
            let mipmap_dir = res_dir.join(format!("mipmap-{density}"));
            std::fs::create_dir_all(&mipmap_dir).context(IoSnafu { path: mipmap_dir.clone() })?;
            let dest = mipmap_dir.join("ic_launcher.png");
            std::fs::copy(icon_path, &dest).context(IoSnafu { path: dest })?;
        }
        Ok(())
    }

    fn synthesize_default_icon(&self) -> Result<()> {
        let res_dir = self.project_dir.join("app/src/main/res");
        for (density, size) in MIPMAP_DENSITIES {
            let mipmap_dir = res_dir.join(format!("mipmap-{density}"));
            std::fs::create_dir_all(&mipmap_dir).context(IoSnafu { path: mipmap_dir.clone() })?;
            let dest = mipmap_dir.join("ic_launcher.png");

            let image = ::image::RgbImage::from_pixel(*size, *size, ::image::Rgb(DEFAULT_ICON_COLOR));
            image
                .save_with_format(&dest, ::image::ImageFormat::Png)
                .context(IconEncodeSnafu)?;
        }
        Ok(())
    }
}

fn activity_java_source(package_name: &str) -> String {
    format!(
        r#"package {package_name};

import android.os.Bundle;
import android.content.res.AssetManager;
import android.util.Log;
import java.io.File;
import java.io.FileOutputStream;
import java.io.IOException;
import java.io.InputStream;
import java.io.OutputStream;
import org.libsdl.app.SDLActivity;

public class KirikiriSDL2Activity extends SDLActivity {{
    private static final String TAG = "KirikiriSDL2";
    private static final String ASSETS_DATA_DIR = "data";
    private static String sNativeLibDir = null;

    @Override
    protected void onCreate(Bundle savedInstanceState) {{
        sNativeLibDir = getApplicationInfo().nativeLibraryDir;
        Log.i(TAG, "Native library directory: " + sNativeLibDir);
        copyAssetsToInternal();
        super.onCreate(savedInstanceState);
    }}

    @Override
    protected String[] getArguments() {{
        if (sNativeLibDir != null) {{
            return new String[]{{"-krkrsdl2_pluginsearchpath=" + sNativeLibDir}};
        }}
        return new String[]{{}};
    }}

    private void copyAssetsToInternal() {{
        AssetManager assetManager = getAssets();
        File destDir = getFilesDir();
        try {{
            copyAssetFolder(assetManager, ASSETS_DATA_DIR, destDir);
        }} catch (IOException e) {{
            Log.e(TAG, "Failed to copy assets", e);
        }}
    }}

    private void copyAssetFolder(AssetManager assetManager, String srcPath, File destDir)
            throws IOException {{
        String[] files = assetManager.list(srcPath);
        if (files == null || files.length == 0) {{
            copyAssetFile(assetManager, srcPath, destDir);
            return;
        }}
        for (String file : files) {{
            String srcFilePath = srcPath + "/" + file;
            File destFile = new File(destDir, file);
            String[] subFiles = assetManager.list(srcFilePath);
            if (subFiles != null && subFiles.length > 0) {{
                destFile.mkdirs();
                copyAssetFolder(assetManager, srcFilePath, destFile);
            }} else {{
                copyAssetFile(assetManager, srcFilePath, destDir);
            }}
        }}
    }}

    private void copyAssetFile(AssetManager assetManager, String srcPath, File destDir)
            throws IOException {{
        String fileName = srcPath.contains("/")
                ? srcPath.substring(srcPath.lastIndexOf("/") + 1)
                : srcPath;
        File destFile = new File(destDir, fileName);
        if (destFile.exists()) {{
            return;
        }}
        destFile.getParentFile().mkdirs();
        try (InputStream in = assetManager.open(srcPath);
             OutputStream out = new FileOutputStream(destFile)) {{
            byte[] buffer = new byte[8192];
            int read;
            while ((read = in.read(buffer)) != -1) {{
                out.write(buffer, 0, read);
            }}
        }}
    }}
}}
"#
    )
}

fn rewrite_build_gradle_text(content: &str, package_name: &str) -> String {
    let mut out = content.to_string();

    if !out.contains("namespace") {
        out = ANDROID_BLOCK
            .replace(&out, format!("$1\n    namespace \"{package_name}\""))
            .into_owned();
    }

    out = COMPILE_SDK
        .replace(&out, format!("compileSdkVersion {COMPILE_SDK_VERSION}"))
        .into_owned();
    out = MIN_SDK
        .replace(&out, format!("minSdkVersion {MIN_SDK_VERSION}"))
        .into_owned();
    out = TARGET_SDK
        .replace(&out, format!("targetSdkVersion {TARGET_SDK_VERSION}"))
        .into_owned();

    if out.contains("applicationId") {
        out = APPLICATION_ID
            .replace(&out, format!("applicationId \"{package_name}\""))
            .into_owned();
    }

    out = CMAKE_BLOCK.replace(&out, "").into_owned();
    out = NDK_BUILD_BLOCK.replace(&out, "").into_owned();
    out = NDK_ABI_BLOCK.replace(&out, "").into_owned();

    out
}

fn rewrite_manifest_text(content: &str) -> String {
    let mut out = MANIFEST_PACKAGE_ATTR.replace(content, "").into_owned();

    out = APPLICATION_TAG
        .replace(&out, |caps: &regex::Captures| add_attr_if_missing(&caps[0], "android:extractNativeLibs", "true"))
        .into_owned();

    for tag_re in [&*ACTIVITY_TAG, &*SERVICE_TAG, &*RECEIVER_TAG] {
        out = tag_re
            .replace_all(&out, |caps: &regex::Captures| add_attr_if_missing(&caps[0], "android:exported", "true"))
            .into_owned();
    }

    out
}

fn add_attr_if_missing(tag: &str, attr: &str, value: &str) -> String {
    if tag.contains(attr) {
        return tag.to_string();
    }
    if let Some(stripped) = tag.strip_suffix("/>") {
        format!("{stripped} {attr}=\"{value}\"/>")
    } else if let Some(stripped) = tag.strip_suffix('>') {
        format!("{stripped} {attr}=\"{value}\">")
    } else {
        tag.to_string()
    }
}

fn xml_escape(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '&' => "&amp;".to_string(),
            '<' => "&lt;".to_string(),
            '>' => "&gt;".to_string(),
            '"' => "&quot;".to_string(),
            '\'' => "&#39;".to_string(),
            other => other.to_string(),
        })
        .collect()
}

fn copy_tree(src: &Path, dest: &Path) -> Result<()> {
    for entry in walkdir::WalkDir::new(src).into_iter().filter_map(|e| e.ok()) {
        let relative = entry.path().strip_prefix(src).unwrap();
        let target = dest.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target).context(IoSnafu { path: target })?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).context(IoSnafu { path: parent.to_path_buf() })?;
            }
            std::fs::copy(entry.path(), &target).context(IoSnafu { path: target })?;
        }
    }
    Ok(())
}
