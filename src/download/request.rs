//! Fetch requests
//!
//! A request names one page of one resource. Two requests are the same
//! in-flight fetch when their resource keys match, whatever the rest of
//! their content.

use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use url::Url;

use super::error::FetchError;

/// Referer expected by the Pixiv image host for an artwork
pub fn pixiv_referer(illust_id: u64) -> String {
    format!(
        "https://www.pixiv.net/member_illust.php?mode=medium&illust_id={}",
        illust_id
    )
}

/// Trailing path segment of a URL, without query or fragment
pub fn resource_name(source_url: &str) -> Option<String> {
    let name = match Url::parse(source_url) {
        Ok(url) => url
            .path_segments()
            .and_then(|mut segments| segments.next_back().map(str::to_string)),
        Err(_) => source_url
            .split(['?', '#'])
            .next()
            .and_then(|path| path.rsplit('/').next())
            .map(str::to_string),
    };
    name.filter(|n| !n.is_empty())
}

/// Page index encoded as `_p<N>` in a Pixiv file name (`123_p2.jpg` → 2)
pub fn page_index_from_name(name: &str) -> Option<u32> {
    name.match_indices("_p").find_map(|(idx, _)| {
        let digits: String = name[idx + 2..]
            .chars()
            .take_while(char::is_ascii_digit)
            .collect();
        digits.parse().ok()
    })
}

/// One page of one resource to bring into the local cache directory
#[derive(Debug, Clone)]
pub struct FetchRequest {
    resource: String,
    page_index: u32,
    source_url: String,
    destination: PathBuf,
    referer: Option<String>,
}

impl FetchRequest {
    pub fn new(
        resource: impl Into<String>,
        page_index: u32,
        source_url: impl Into<String>,
        destination: impl Into<PathBuf>,
    ) -> Self {
        Self {
            resource: resource.into(),
            page_index,
            source_url: source_url.into(),
            destination: destination.into(),
            referer: None,
        }
    }

    /// Build a request for a Pixiv artwork page, storing the file under
    /// `cache_dir` with the URL's own file name.
    pub fn for_illust(
        illust_id: u64,
        source_url: &str,
        cache_dir: &Path,
    ) -> Result<Self, FetchError> {
        let name = resource_name(source_url).ok_or_else(|| {
            FetchError::InvalidRequest(format!("no file name in url '{}'", source_url))
        })?;
        let page_index = page_index_from_name(&name).unwrap_or(0);

        Ok(Self::new(
            format!("illust:{}", illust_id),
            page_index,
            source_url,
            cache_dir.join(&name),
        )
        .with_referer(pixiv_referer(illust_id)))
    }

    pub fn with_referer(mut self, referer: impl Into<String>) -> Self {
        self.referer = Some(referer.into());
        self
    }

    /// Identity of the single-flight slot: `<resource>:p<page>`
    pub fn resource_key(&self) -> String {
        format!("{}:p{}", self.resource, self.page_index)
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn page_index(&self) -> u32 {
        self.page_index
    }

    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn referer(&self) -> Option<&str> {
        self.referer.as_deref()
    }

    /// File name under which the resource is indexed
    pub fn resource_name(&self) -> String {
        resource_name(&self.source_url)
            .or_else(|| {
                self.destination
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
            })
            .unwrap_or_else(|| self.resource_key())
    }
}

impl PartialEq for FetchRequest {
    fn eq(&self, other: &Self) -> bool {
        self.resource == other.resource && self.page_index == other.page_index
    }
}

impl Eq for FetchRequest {}

impl Hash for FetchRequest {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.resource.hash(state);
        self.page_index.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "https://i.pximg.net/img-original/img/2024/01/01/00/00/00/123_p0.jpg";

    #[test]
    fn test_resource_name() {
        assert_eq!(resource_name(URL).as_deref(), Some("123_p0.jpg"));
        assert_eq!(
            resource_name("https://example/123_p1.png?size=large").as_deref(),
            Some("123_p1.png")
        );
        assert_eq!(resource_name("https://example/dir/"), None);
    }

    #[test]
    fn test_page_index_from_name() {
        assert_eq!(page_index_from_name("123_p0.jpg"), Some(0));
        assert_eq!(page_index_from_name("123_p12_master1200.jpg"), Some(12));
        assert_eq!(page_index_from_name("cover.png"), None);
        assert_eq!(page_index_from_name("a_photo_p3.jpg"), Some(3));
    }

    #[test]
    fn test_for_illust() {
        let req = FetchRequest::for_illust(123, URL, Path::new("/tmp/cache")).unwrap();
        assert_eq!(req.resource(), "illust:123");
        assert_eq!(req.page_index(), 0);
        assert_eq!(req.resource_key(), "illust:123:p0");
        assert_eq!(req.destination(), Path::new("/tmp/cache/123_p0.jpg"));
        assert_eq!(req.referer(), Some(pixiv_referer(123).as_str()));
        assert_eq!(req.resource_name(), "123_p0.jpg");
    }

    #[test]
    fn test_for_illust_rejects_url_without_name() {
        assert!(FetchRequest::for_illust(1, "https://example/", Path::new("/tmp")).is_err());
    }

    #[test]
    fn test_equality_by_resource_key() {
        let a = FetchRequest::new("illust:123", 0, "https://a/123_p0.jpg", "/tmp/a.jpg");
        let b = FetchRequest::new("illust:123", 0, "https://b/123_p0.jpg", "/tmp/b.jpg")
            .with_referer("https://www.pixiv.net/");
        let c = FetchRequest::new("illust:123", 1, "https://a/123_p1.jpg", "/tmp/a.jpg");

        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
