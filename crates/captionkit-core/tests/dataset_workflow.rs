use captionkit_core::{Filter, ImageLibrary, Settings, SettingsStore};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn write_image(dir: &Path, name: &str, width: u32, height: u32) {
    image::RgbImage::new(width, height)
        .save(dir.join(name))
        .unwrap();
}

#[test]
fn edit_filter_and_move_a_dataset() {
    let data = TempDir::new().unwrap();
    let dataset = data.path().join("dataset");
    let sorted = data.path().join("sorted");
    fs::create_dir_all(&dataset).unwrap();
    fs::create_dir_all(&sorted).unwrap();

    write_image(&dataset, "01.png", 64, 32);
    write_image(&dataset, "02.jpg", 32, 32);
    write_image(&dataset, "03.bmp", 16, 16);
    fs::write(dataset.join("01.txt"), "cat, sitting, indoors").unwrap();
    fs::write(dataset.join("02.txt"), "dog, running").unwrap();
    fs::write(dataset.join("notes.md"), "not an image").unwrap();

    // Separator with the trailing space, as the settings produce by default.
    let settings = Settings::default();
    let mut library = ImageLibrary::new(settings.separator());
    assert_eq!(library.load_directory(&dataset).unwrap(), 3);
    assert_eq!(library.images()[0].tags, vec!["cat", "sitting", "indoors"]);
    assert_eq!(library.images()[0].dimensions, Some((64, 32)));
    assert!(library.images()[2].tags.is_empty());

    let filter = Filter::parse("NOT tag:dog AND tags:>=1").unwrap().unwrap();
    let view = library.filtered(Some(&filter));
    assert_eq!(view.len(), 1);
    assert_eq!(view[0].file_name(), "01.png");
    assert_eq!(library.first_untagged_index(None), Some(2));

    let third = dataset.join("03.bmp");
    library
        .update_tags(&third, vec!["bird".to_string(), "flying".to_string()])
        .unwrap();
    assert_eq!(fs::read_to_string(dataset.join("03.txt")).unwrap(), "bird, flying");
    assert_eq!(library.first_untagged_index(None), Some(2));

    let report = library
        .move_images(&[dataset.join("02.jpg")], &sorted)
        .unwrap();
    assert_eq!(report.succeeded.len(), 1);
    assert!(report.failed.is_empty());
    assert!(sorted.join("02.jpg").exists());
    assert!(sorted.join("02.txt").exists());
    assert_eq!(library.len(), 2);
}

#[test]
fn settings_survive_a_restart() {
    let data = TempDir::new().unwrap();
    let store = SettingsStore::new(data.path());

    store
        .update(|settings| {
            settings.tag_separator = ";".to_string();
            settings.insert_space_after_tag_separator = false;
            settings.directory_path = Some(data.path().join("images"));
        })
        .unwrap();

    let reopened = SettingsStore::new(data.path()).load().unwrap();
    assert_eq!(reopened.separator(), ";");
    assert_eq!(reopened.directory_path, Some(data.path().join("images")));
    assert!(store
        .path()
        .ends_with(Path::new("captionkit-data").join("settings.json")));
}
