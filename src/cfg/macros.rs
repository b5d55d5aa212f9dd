//! 组件构造相关的宏
//!
//! 所有组件都遵循 `Type::new(config)` 的构造约定，注册表需要 `From<Config>`
//! 以及 `Box<Type> -> Box<dyn Trait>` 两个转换，这里统一生成

/// 为配置类型实现 `From<Config> for Type`，调用 `Type::new(config)`
#[macro_export]
macro_rules! impl_from {
    ($config_type:ty => $target_type:ty) => {
        impl From<$config_type> for $target_type {
            fn from(config: $config_type) -> Self {
                <$target_type>::new(config)
            }
        }
    };
}

/// 实现 `Box<Type>` 到 `Box<dyn Trait>` 的转换
///
/// 用法：`impl_box_from!(Type => dyn TraitName)`
#[macro_export]
macro_rules! impl_box_from {
    ($source_type:ty => dyn $trait_name:path) => {
        impl From<Box<$source_type>> for Box<dyn $trait_name> {
            fn from(source: Box<$source_type>) -> Self {
                source as Box<dyn $trait_name>
            }
        }
    };
}

#[cfg(test)]
mod tests {
    #[derive(Debug)]
    struct EndpointConfig {
        url: String,
    }

    struct Endpoint {
        url: String,
    }

    impl Endpoint {
        fn new(config: EndpointConfig) -> Self {
            Self { url: config.url }
        }
    }

    trait Locate {
        fn locate(&self) -> &str;
    }

    impl Locate for Endpoint {
        fn locate(&self) -> &str {
            &self.url
        }
    }

    impl_from!(EndpointConfig => Endpoint);
    impl_box_from!(Endpoint => dyn Locate);

    #[test]
    fn test_impl_from_and_box_from() {
        let config = EndpointConfig {
            url: "http://127.0.0.1:8080".to_string(),
        };
        let endpoint = Endpoint::from(config);
        assert_eq!(endpoint.url, "http://127.0.0.1:8080");

        let boxed: Box<dyn Locate> = Box::new(endpoint).into();
        assert_eq!(boxed.locate(), "http://127.0.0.1:8080");
    }
}
