use crate::config::{ConfigArgs, ServerConfig};
use crate::error::ServerError;

/// Загрузить и проверить конфиг без подключений. Печатает таблицу маршрутов.
pub fn run(args: ConfigArgs) -> Result<(), ServerError> {
    let config = ServerConfig::load(&args.config)?;
    let router = config.validate()?;
    config.create_store()?;
    config.create_broker()?;

    println!("config '{}' is valid", args.config);
    println!("broker: {}, storage: {}", config.broker, config.storage);
    println!(
        "queue: capacity {} ({:?}), retry: {} attempts",
        config.queue.capacity, config.queue.overflow, config.retry.max_attempts
    );
    let width = router.specs().map(|(spec, _)| spec.topic.len()).max().unwrap_or(0);
    for (spec, template) in router.specs() {
        println!("  {:<width$}  ->  {}", spec.topic, template.as_str());
    }
    Ok(())
}
