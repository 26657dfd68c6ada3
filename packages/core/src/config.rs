//! Централизованная конфигурация для Whisper Core
//!
//! Все настраиваемые параметры secure-channel определены здесь.
//! Константы wire-формата (длина nonce, длина ключа, HKDF labels) живут рядом
//! со своим кодом и НЕ настраиваются: от них зависит совместимость с пирами.

use std::sync::OnceLock;

/// Глобальная конфигурация приложения (синглтон)
static GLOBAL_CONFIG: OnceLock<Config> = OnceLock::new();

/// Источник соли для HKDF при ротации ключа
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationSalt {
    /// Соль выводится из номера эпохи: оба пира получают одинаковую цепочку ключей
    EpochBound,
    /// Свежая случайная соль на каждую ротацию; история ключей локальна для отправителя
    Random,
}

impl RotationSalt {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "epoch" | "epoch-bound" | "epoch_bound" => Some(RotationSalt::EpochBound),
            "random" => Some(RotationSalt::Random),
            _ => None,
        }
    }
}

/// Основная структура конфигурации
#[derive(Debug, Clone)]
pub struct Config {
    // ============================================
    // РОТАЦИЯ КЛЮЧЕЙ
    // ============================================

    /// Ротация выполняется, когда счётчик исходящих сообщений кратен этому значению
    pub rotation_threshold: u64,

    /// Откуда берётся HKDF salt при ротации
    pub rotation_salt: RotationSalt,

    /// Длина случайной соли для `RotationSalt::Random` (в байтах)
    pub rotation_salt_length: usize,

    /// Сколько эпох хранить в истории ключей (None = без ограничения)
    pub max_retained_epochs: Option<usize>,

    /// Максимум эпох, на которые цепочка может быть продлена вперёд
    /// при расшифровке одного сообщения (DoS защита)
    pub max_epoch_skip: u64,

    // ============================================
    // ВАЛИДАЦИЯ DH ПАРАМЕТРОВ
    // ============================================

    /// Минимальная длина модуля (в битах)
    pub min_modulus_bits: u64,

    /// Проверять, что модуль является safe prime
    pub verify_safe_prime: bool,

    /// Количество раундов Miller-Rabin
    pub primality_rounds: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            // Ротация
            rotation_threshold: 10,
            rotation_salt: RotationSalt::EpochBound,
            rotation_salt_length: 32,
            max_retained_epochs: None,
            max_epoch_skip: 1000,

            // DH
            min_modulus_bits: 256,
            verify_safe_prime: true,
            primality_rounds: 32,
        }
    }
}

impl Config {
    /// Создать конфигурацию из переменных окружения
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // Переопределяем значения из env, если они заданы
        if let Ok(val) = std::env::var("ROTATION_THRESHOLD") {
            if let Ok(parsed) = val.parse::<u64>() {
                if parsed > 0 {
                    config.rotation_threshold = parsed;
                }
            }
        }

        if let Ok(val) = std::env::var("ROTATION_SALT") {
            if let Some(parsed) = RotationSalt::parse(&val) {
                config.rotation_salt = parsed;
            }
        }

        if let Ok(val) = std::env::var("MAX_RETAINED_EPOCHS") {
            if let Ok(parsed) = val.parse::<usize>() {
                config.max_retained_epochs = (parsed > 0).then_some(parsed);
            }
        }

        if let Ok(val) = std::env::var("MAX_EPOCH_SKIP") {
            if let Ok(parsed) = val.parse() {
                config.max_epoch_skip = parsed;
            }
        }

        if let Ok(val) = std::env::var("MIN_MODULUS_BITS") {
            if let Ok(parsed) = val.parse() {
                config.min_modulus_bits = parsed;
            }
        }

        if let Ok(val) = std::env::var("VERIFY_SAFE_PRIME") {
            if let Ok(parsed) = val.parse() {
                config.verify_safe_prime = parsed;
            }
        }

        if let Ok(val) = std::env::var("PRIMALITY_ROUNDS") {
            if let Ok(parsed) = val.parse() {
                config.primality_rounds = parsed;
            }
        }

        config
    }

    /// Получить глобальный экземпляр конфигурации
    ///
    /// Автоматически инициализирует конфигурацию со значениями по умолчанию при первом вызове
    pub fn global() -> &'static Config {
        GLOBAL_CONFIG.get_or_init(Config::default)
    }

    /// Инициализировать глобальную конфигурацию со значениями по умолчанию
    ///
    /// # Errors
    ///
    /// Возвращает ошибку, если конфигурация уже была инициализирована
    pub fn init() -> Result<(), &'static str> {
        GLOBAL_CONFIG
            .set(Self::default())
            .map_err(|_| "Config already initialized")
    }

    /// Инициализировать глобальную конфигурацию из переменных окружения
    ///
    /// # Errors
    ///
    /// Возвращает ошибку, если конфигурация уже была инициализирована
    pub fn init_from_env() -> Result<(), &'static str> {
        GLOBAL_CONFIG
            .set(Self::from_env())
            .map_err(|_| "Config already initialized")
    }

    /// Инициализировать глобальную конфигурацию с кастомным экземпляром
    ///
    /// # Errors
    ///
    /// Возвращает ошибку, если конфигурация уже была инициализирована
    pub fn init_with(config: Config) -> Result<(), &'static str> {
        GLOBAL_CONFIG
            .set(config)
            .map_err(|_| "Config already initialized")
    }

    /// Проверить, инициализирована ли глобальная конфигурация
    pub fn is_initialized() -> bool {
        GLOBAL_CONFIG.get().is_some()
    }
}
