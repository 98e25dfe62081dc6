//! M10.1: Client Options
//!
//! 클라이언트 설정 (드라이버 팩토리에 그대로 전달됨)

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::{ClientError, ClientResult};

/// 기본 단일 노드 호스트
pub const DEFAULT_HOST: &str = "localhost";
/// 기본 단일 노드 포트
pub const DEFAULT_PORT: u16 = 7687;
/// 기본 사용자명
pub const DEFAULT_USERNAME: &str = "neo4j";
/// 기본 비밀번호
pub const DEFAULT_PASSWORD: &str = "neo4j";
/// 기본 스트림 high-water mark
pub const DEFAULT_STREAM_HIGH_WATER_MARK: usize = 16;

const KNOWN_SCHEMES: &[&str] = &[
    "bolt",
    "bolt+s",
    "bolt+ssc",
    "bolt+routing",
    "neo4j",
    "neo4j+s",
    "neo4j+ssc",
    "zeta4g",
    "zeta4g+s",
    "zeta4g+ssc",
];

// ============================================================================
// AuthToken - 인증 토큰
// ============================================================================

/// 인증 토큰 (드라이버에 전달되는 최종 형태)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthToken {
    /// 인증 없음
    None,
    /// Basic 인증
    Basic {
        /// 사용자명
        username: String,
        /// 비밀번호
        password: String,
    },
    /// Kerberos 인증
    Kerberos {
        /// base64 인코딩된 티켓
        ticket: String,
    },
    /// 커스텀 인증
    Custom {
        /// 주체
        principal: String,
        /// 자격 증명
        credentials: String,
        /// realm
        realm: Option<String>,
        /// 스킴
        scheme: String,
        /// 추가 파라미터
        parameters: HashMap<String, String>,
    },
}

impl AuthToken {
    /// 인증 스킴
    pub fn scheme(&self) -> &str {
        match self {
            Self::None => "none",
            Self::Basic { .. } => "basic",
            Self::Kerberos { .. } => "kerberos",
            Self::Custom { scheme, .. } => scheme,
        }
    }
}

// ============================================================================
// AuthOptions - 인증 설정
// ============================================================================

/// 인증 스킴 선택
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthScheme {
    /// 인증 없음
    None,
    /// Basic 인증
    #[default]
    Basic,
    /// Kerberos 인증
    Kerberos,
    /// 커스텀 인증
    Custom,
}

/// 인증 설정
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AuthOptions {
    /// 인증 스킴
    pub auth_scheme: AuthScheme,
    /// 사용자명
    pub username: String,
    /// 비밀번호
    pub password: String,
    /// 커스텀 스킴 이름
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,
    /// realm
    #[serde(skip_serializing_if = "Option::is_none")]
    pub realm: Option<String>,
    /// 커스텀 파라미터
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub parameters: HashMap<String, String>,
    /// Kerberos 티켓
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base64_encoded_ticket: Option<String>,
}

impl Default for AuthOptions {
    fn default() -> Self {
        Self {
            auth_scheme: AuthScheme::Basic,
            username: DEFAULT_USERNAME.to_string(),
            password: DEFAULT_PASSWORD.to_string(),
            scheme: None,
            realm: None,
            parameters: HashMap::new(),
            base64_encoded_ticket: None,
        }
    }
}

impl AuthOptions {
    /// 인증 없음
    pub fn none() -> Self {
        Self {
            auth_scheme: AuthScheme::None,
            ..Default::default()
        }
    }

    /// Basic 인증
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            auth_scheme: AuthScheme::Basic,
            username: username.into(),
            password: password.into(),
            ..Default::default()
        }
    }

    /// Kerberos 인증
    pub fn kerberos(base64_encoded_ticket: impl Into<String>) -> Self {
        Self {
            auth_scheme: AuthScheme::Kerberos,
            base64_encoded_ticket: Some(base64_encoded_ticket.into()),
            ..Default::default()
        }
    }

    /// 커스텀 스킴 설정
    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = Some(scheme.into());
        self
    }

    /// realm 설정
    pub fn with_realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = Some(realm.into());
        self
    }

    /// 파라미터 추가
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// 인증 토큰으로 변환
    pub fn auth_token(&self) -> ClientResult<AuthToken> {
        match self.auth_scheme {
            AuthScheme::None => Ok(AuthToken::None),
            AuthScheme::Basic => Ok(AuthToken::Basic {
                username: self.username.clone(),
                password: self.password.clone(),
            }),
            AuthScheme::Kerberos => {
                let ticket = self.base64_encoded_ticket.clone().ok_or_else(|| {
                    ClientError::configuration("Kerberos auth requires a base64 encoded ticket")
                })?;
                Ok(AuthToken::Kerberos { ticket })
            }
            AuthScheme::Custom => {
                let scheme = self.scheme.clone().ok_or_else(|| {
                    ClientError::configuration("Custom auth requires a scheme name")
                })?;
                Ok(AuthToken::Custom {
                    principal: self.username.clone(),
                    credentials: self.password.clone(),
                    realm: self.realm.clone(),
                    scheme,
                    parameters: self.parameters.clone(),
                })
            }
        }
    }
}

impl fmt::Debug for AuthOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthOptions")
            .field("auth_scheme", &self.auth_scheme)
            .field("username", &self.username)
            .field("scheme", &self.scheme)
            .field("realm", &self.realm)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// EncryptionOptions - TLS 설정
// ============================================================================

/// TLS 신뢰 전략 선택
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrustStrategy {
    /// 모든 인증서 신뢰 (개발용)
    TrustAllCertificates,
    /// 지정한 CA가 서명한 인증서만 신뢰
    TrustCustomCaSignedCertificates,
    /// 시스템 CA 사용
    #[default]
    TrustSystemCaSignedCertificates,
}

/// 확정된 신뢰 설정
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trust {
    /// 모든 인증서
    AllCertificates {
        /// 호스트명 검증 여부
        hostname_verification: bool,
    },
    /// 시스템 CA
    SystemCas {
        /// 호스트명 검증 여부
        hostname_verification: bool,
    },
    /// 커스텀 CA 인증서 파일
    CustomCa {
        /// 인증서 파일 경로
        certificate: PathBuf,
        /// 호스트명 검증 여부
        hostname_verification: bool,
    },
}

/// TLS 설정
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EncryptionOptions {
    /// 신뢰 전략
    pub strategy: TrustStrategy,
    /// 커스텀 CA 인증서 경로
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate_file_path: Option<PathBuf>,
    /// 호스트명 검증 여부
    pub hostname_verification: bool,
}

impl Default for EncryptionOptions {
    fn default() -> Self {
        Self {
            strategy: TrustStrategy::default(),
            certificate_file_path: None,
            hostname_verification: true,
        }
    }
}

impl EncryptionOptions {
    /// 신뢰 전략 설정
    pub fn with_strategy(mut self, strategy: TrustStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// 인증서 경로 설정
    pub fn with_certificate_file_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.certificate_file_path = Some(path.into());
        self
    }

    /// 호스트명 검증 설정
    pub fn with_hostname_verification(mut self, enabled: bool) -> Self {
        self.hostname_verification = enabled;
        self
    }

    /// 확정된 신뢰 설정
    pub fn trust(&self) -> ClientResult<Trust> {
        let hostname_verification = self.hostname_verification;
        match self.strategy {
            TrustStrategy::TrustAllCertificates => Ok(Trust::AllCertificates {
                hostname_verification,
            }),
            TrustStrategy::TrustSystemCaSignedCertificates => Ok(Trust::SystemCas {
                hostname_verification,
            }),
            TrustStrategy::TrustCustomCaSignedCertificates => {
                let certificate = self.certificate_file_path.clone().ok_or_else(|| {
                    ClientError::configuration(
                        "TRUST_CUSTOM_CA_SIGNED_CERTIFICATES requires a certificate file path",
                    )
                })?;
                Ok(Trust::CustomCa {
                    certificate,
                    hostname_verification,
                })
            }
        }
    }
}

// ============================================================================
// ServerAddress - 서버 주소
// ============================================================================

/// 서버 주소
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerAddress {
    /// 스킴
    pub scheme: String,
    /// 호스트
    pub host: String,
    /// 포트
    pub port: u16,
}

impl ServerAddress {
    /// URI에서 파싱
    ///
    /// `scheme://host[:port]` 형식만 허용합니다. 포트가 없으면 7687을 사용합니다.
    pub fn from_uri(uri: &str) -> ClientResult<Self> {
        let (scheme, rest) = uri
            .split_once("://")
            .ok_or_else(|| ClientError::configuration(format!("Invalid URI '{}': missing scheme", uri)))?;

        if !KNOWN_SCHEMES.contains(&scheme) {
            return Err(ClientError::configuration(format!(
                "Invalid URI '{}': unsupported scheme '{}'",
                uri, scheme
            )));
        }

        let authority = rest.split(['/', '?']).next().unwrap_or_default();
        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse()
                    .map_err(|_| ClientError::configuration(format!("Invalid port in URI '{}'", uri)))?;
                (host, port)
            }
            None => (authority, DEFAULT_PORT),
        };

        if host.is_empty() {
            return Err(ClientError::configuration(format!("Invalid URI '{}': empty host", uri)));
        }

        Ok(Self {
            scheme: scheme.to_string(),
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

// ============================================================================
// ClientOptions - 클라이언트 설정
// ============================================================================

/// 클라이언트 설정
///
/// 연결, 인증, 암호화, 풀 관련 값은 해석하지 않고 드라이버 팩토리에 전달됩니다.
/// 이 계층이 직접 사용하는 값은 `stream_high_water_mark` 뿐입니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClientOptions {
    /// 단일 노드 호스트
    pub host: String,
    /// 단일 노드 포트
    pub port: u16,
    /// 클러스터 노드 URI (비어 있으면 단일 노드 모드)
    #[serde(rename = "clusterNodeURIs")]
    pub cluster_node_uris: BTreeSet<String>,
    /// 인증 설정
    pub auth_options: AuthOptions,
    /// TLS 암호화 여부
    #[serde(rename = "encryptionEnabled")]
    pub encrypted: bool,
    /// TLS 설정
    pub encryption_options: EncryptionOptions,
    /// 연결 풀 최대 크기
    pub max_connection_pool_size: usize,
    /// 연결 획득 타임아웃
    #[serde(with = "duration_millis")]
    pub connection_acquisition_timeout: Duration,
    /// 연결 최대 수명
    #[serde(with = "duration_millis")]
    pub max_connection_lifetime: Duration,
    /// 유휴 연결 검사 간격 (None이면 검사 안 함)
    #[serde(with = "optional_duration_millis")]
    pub idle_time_before_connection_test: Option<Duration>,
    /// 이벤트 루프 스레드 수 (0이면 드라이버 기본값)
    #[serde(rename = "numberOfEventLoopThreads")]
    pub event_loop_threads: usize,
    /// 누수 세션 로깅
    pub log_leaked_sessions: bool,
    /// Fetch Size
    pub fetch_size: usize,
    /// 드라이버 메트릭 활성화
    #[serde(rename = "driverMetricsEnabled")]
    pub metrics_enabled: bool,
    /// 레코드 스트림 전달 큐 high-water mark
    pub stream_high_water_mark: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            cluster_node_uris: BTreeSet::new(),
            auth_options: AuthOptions::default(),
            encrypted: false,
            encryption_options: EncryptionOptions::default(),
            max_connection_pool_size: 100,
            connection_acquisition_timeout: Duration::from_secs(60),
            max_connection_lifetime: Duration::from_secs(3600),
            idle_time_before_connection_test: None,
            event_loop_threads: 0,
            log_leaked_sessions: false,
            fetch_size: 1000,
            metrics_enabled: false,
            stream_high_water_mark: DEFAULT_STREAM_HIGH_WATER_MARK,
        }
    }
}

impl ClientOptions {
    /// 기본 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 호스트 설정
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// 포트 설정
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// 클러스터 노드 URI 추가
    pub fn with_cluster_node_uri(mut self, uri: impl Into<String>) -> Self {
        self.cluster_node_uris.insert(uri.into());
        self
    }

    /// 인증 설정
    pub fn with_auth_options(mut self, auth_options: AuthOptions) -> Self {
        self.auth_options = auth_options;
        self
    }

    /// TLS 암호화 설정
    pub fn with_encrypted(mut self, encrypted: bool) -> Self {
        self.encrypted = encrypted;
        self
    }

    /// TLS 설정
    pub fn with_encryption_options(mut self, encryption_options: EncryptionOptions) -> Self {
        self.encryption_options = encryption_options;
        self
    }

    /// 연결 풀 크기 설정
    pub fn with_max_connection_pool_size(mut self, size: usize) -> Self {
        self.max_connection_pool_size = size;
        self
    }

    /// 연결 획득 타임아웃 설정
    pub fn with_connection_acquisition_timeout(mut self, timeout: Duration) -> Self {
        self.connection_acquisition_timeout = timeout;
        self
    }

    /// 연결 최대 수명 설정
    pub fn with_max_connection_lifetime(mut self, lifetime: Duration) -> Self {
        self.max_connection_lifetime = lifetime;
        self
    }

    /// 유휴 연결 검사 간격 설정
    pub fn with_idle_time_before_connection_test(mut self, idle: Duration) -> Self {
        self.idle_time_before_connection_test = Some(idle);
        self
    }

    /// Fetch Size 설정
    pub fn with_fetch_size(mut self, size: usize) -> Self {
        self.fetch_size = size;
        self
    }

    /// 메트릭 설정
    pub fn with_metrics_enabled(mut self, enabled: bool) -> Self {
        self.metrics_enabled = enabled;
        self
    }

    /// 스트림 high-water mark 설정 (1이면 파이프라이닝 없음)
    pub fn with_stream_high_water_mark(mut self, high_water_mark: usize) -> Self {
        self.stream_high_water_mark = high_water_mark;
        self
    }

    /// 클러스터 모드 여부
    pub fn is_cluster_mode(&self) -> bool {
        !self.cluster_node_uris.is_empty()
    }

    /// 단일 노드 URI
    pub fn single_node_uri(&self) -> String {
        format!("bolt://{}:{}", self.host, self.port)
    }

    /// 인증 토큰
    pub fn auth_token(&self) -> ClientResult<AuthToken> {
        self.auth_options.auth_token()
    }

    /// 설정 검증
    pub fn validate(&self) -> ClientResult<()> {
        if self.host.is_empty() && !self.is_cluster_mode() {
            return Err(ClientError::configuration("Host must not be empty"));
        }
        for uri in &self.cluster_node_uris {
            ServerAddress::from_uri(uri)?;
        }
        if self.stream_high_water_mark == 0 {
            return Err(ClientError::configuration(
                "Stream high-water mark must be at least 1",
            ));
        }
        self.auth_options.auth_token()?;
        if self.encrypted {
            self.encryption_options.trust()?;
        }
        Ok(())
    }

    /// JSON으로 변환
    pub fn to_json(&self) -> ClientResult<serde_json::Value> {
        serde_json::to_value(self)
            .map_err(|e| ClientError::configuration(format!("Cannot serialize options: {}", e)))
    }

    /// JSON에서 생성 (없는 키는 기본값)
    pub fn from_json(json: serde_json::Value) -> ClientResult<Self> {
        serde_json::from_value(json)
            .map_err(|e| ClientError::configuration(format!("Invalid options: {}", e)))
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod optional_duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_i64(d.as_millis() as i64),
            None => serializer.serialize_i64(-1),
        }
    }

    // 음수는 검사 안 함
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        let millis = i64::deserialize(deserializer)?;
        Ok(u64::try_from(millis).ok().map(Duration::from_millis))
    }
}

// ============================================================================
// Tests
// ============================================================================
