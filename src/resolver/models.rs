use serde_derive::Deserialize;

// playurl 接口响应。普通视频包在 data 字段，番剧包在 result 字段
#[derive(Debug, Deserialize, Clone)]
pub struct PlayUrlResponse {
    pub code: i64,
    #[serde(default)]
    pub message: String,
    pub data: Option<PlayUrlData>,
    pub result: Option<PlayUrlData>,
}

impl PlayUrlResponse {
    pub fn into_data(self) -> Option<PlayUrlData> {
        self.data.or(self.result)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PlayUrlData {
    pub dash: Option<DashInfo>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct DashInfo {
    #[serde(default)]
    pub video: Vec<DashMedia>,
    #[serde(default)]
    pub audio: Vec<DashMedia>,
    // 无损音轨，仅在响应声明时出现
    #[serde(default)]
    pub flac: Option<FlacNode>,
    // 杜比全景声
    #[serde(default)]
    pub dolby: Option<DolbyNode>,
}

// 单个 DASH 流描述。镜像地址字段在不同接口间存在蛇形/驼峰两种拼写，
// 通过 serde alias 统一吸收，不做动态键探测
#[derive(Debug, Deserialize, Clone, Default)]
pub struct DashMedia {
    pub id: i32,
    #[serde(default)]
    pub codecid: i32,
    #[serde(default, alias = "baseUrl")]
    pub base_url: Option<String>,
    #[serde(default, alias = "backupUrl")]
    pub backup_url: Option<Vec<String>>,
    #[serde(default)]
    pub bandwidth: i64,
    #[serde(default)]
    pub codecs: String,
}

impl DashMedia {
    // 按固定顺序拼接镜像地址：备用地址在前，主地址在后，保持服务端给出的顺序
    pub fn mirror_urls(&self) -> Vec<String> {
        let mut urls = Vec::new();

        if let Some(backup) = &self.backup_url {
            urls.extend(backup.iter().cloned());
        }
        if let Some(base) = &self.base_url {
            urls.push(base.clone());
        }

        urls
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct FlacNode {
    #[serde(default)]
    pub audio: Option<DashMedia>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct DolbyNode {
    #[serde(default)]
    pub audio: Option<Vec<DashMedia>>,
}

// 视频信息接口（x/web-interface/view）响应，用于把 URL 换成内容标识
#[derive(Debug, Deserialize, Clone)]
pub struct ViewResponse {
    pub code: i64,
    #[serde(default)]
    pub message: String,
    pub data: Option<ViewData>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ViewData {
    pub bvid: String,
    pub aid: i64,
    pub cid: i64,
    pub title: String,
    #[serde(default)]
    pub pic: String,
    #[serde(default)]
    pub owner: Option<ViewOwner>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ViewOwner {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub mid: i64,
}
